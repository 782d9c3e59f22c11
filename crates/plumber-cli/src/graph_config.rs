//! Declarative service-graph file format: a small `toml` document naming
//! servlet instances and the edges between their pipe descriptors,
//! replacing the original runtime's hand-wired `examples/greeting/main.c`
//! graph construction with a config source a non-programmer can edit.
//!
//! ```toml
//! input = "parse.request"
//! output = "render.response"
//!
//! [[node]]
//! name = "parse"
//! servlet = "demo.reqparse"
//!
//! [[node]]
//! name = "render"
//! servlet = "demo.resgen"
//!
//! [[edge]]
//! from = "parse.parsed"
//! to = "render.request"
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use plumber_core::error::{codes, ErrorCategory, PlumberError, Result};
use plumber_core::graph::{ExactMatchResolver, GraphBuilder, ServiceGraph};
use plumber_core::servlet::{Servlet, ServletDescriptor, ServletFactory};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NodeConfig {
    name: String,
    servlet: String,
}

#[derive(Debug, Deserialize)]
struct EdgeConfig {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphConfig {
    /// Listener address, overridable from the `run --listen` flag.
    pub listen: Option<String>,
    input: String,
    output: String,
    #[serde(default, rename = "node")]
    nodes: Vec<NodeConfig>,
    #[serde(default, rename = "edge")]
    edges: Vec<EdgeConfig>,
}

fn usage(message: impl Into<String>) -> PlumberError {
    PlumberError::new(codes::USAGE_INVALID_ARGUMENT, ErrorCategory::Usage, message.into())
}

/// Splits `"node.pd"` into its two components, rejecting anything else.
fn split_endpoint(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('.')
        .ok_or_else(|| usage(format!("endpoint {raw:?} must be \"node.pd\"")))
}

impl GraphConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| usage(format!("parsing graph file: {e}")))
    }

    /// Resolves every servlet reference against `factory` and builds the
    /// frozen [`ServiceGraph`] (spec.md §4.4).
    pub fn build(&self, factory: &ServletFactory) -> Result<ServiceGraph> {
        let mut builder = GraphBuilder::new();
        let mut node_ids = HashMap::new();
        let mut node_descriptors = Vec::new();

        for node in &self.nodes {
            let descriptor = factory
                .get(&node.servlet)
                .ok_or_else(|| usage(format!("unknown servlet {:?}", node.servlet)))?;
            // `ServletFactory` hands back a `&ServletDescriptor`; each node
            // in the graph needs its own `Arc<ServletDescriptor>`, so a
            // fresh one is built around the same `Arc<dyn Servlet>`
            // instance rather than cloning any servlet state.
            let instance = Arc::new(ServletDescriptor::new(
                descriptor.name(),
                descriptor.servlet().clone(),
            ));
            let id = builder.add_node(instance);
            node_descriptors.push(descriptor.servlet().clone());
            if node_ids.insert(node.name.clone(), id).is_some() {
                return Err(usage(format!("duplicate node name {:?}", node.name)));
            }
        }

        let pd_index = |node_name: &str, pd_name: &str| -> Result<(usize, usize)> {
            let &node_id = node_ids
                .get(node_name)
                .ok_or_else(|| usage(format!("unknown node {node_name:?}")))?;
            let servlet = &node_descriptors[node_id];
            let pd = servlet
                .pipe_descriptors()
                .iter()
                .position(|d| &*d.name == pd_name)
                .ok_or_else(|| usage(format!("node {node_name:?} has no pipe {pd_name:?}")))?;
            Ok((node_id, pd))
        };

        for edge in &self.edges {
            let (from_node, from_pd) = split_endpoint(&edge.from)?;
            let (to_node, to_pd) = split_endpoint(&edge.to)?;
            let (src_node, src_pd) = pd_index(from_node, from_pd)?;
            let (dst_node, dst_pd) = pd_index(to_node, to_pd)?;
            builder.add_edge(src_node, src_pd, dst_node, dst_pd);
        }

        let (input_node, input_pd) = split_endpoint(&self.input)?;
        let (output_node, output_pd) = split_endpoint(&self.output)?;
        let (in_node, in_pd) = pd_index(input_node, input_pd)?;
        let (out_node, out_pd) = pd_index(output_node, output_pd)?;
        builder.set_input(in_node, in_pd);
        builder.set_output(out_node, out_pd);

        builder.freeze(&ExactMatchResolver)
    }
}
