//! Bundled demo servlets, registered under the `demo.*` namespace so a
//! graph file can reference them without compiling anything of its own —
//! the Rust analogue of the original runtime's `examples/greeting` servlet
//! binaries.

use std::sync::Arc;

use plumber_core::prelude::*;

fn read_all(ctx: &mut TaskContext<'_>, pd: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = ctx.pipe_read(pd, &mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

struct ReqParse {
    pds: Vec<PipeDescriptor>,
}

impl ReqParse {
    fn new() -> Self {
        Self {
            pds: vec![
                PipeDescriptor::new("request", Direction::Input),
                PipeDescriptor::new("parsed", Direction::Output),
            ],
        }
    }
}

impl Servlet for ReqParse {
    fn description(&self) -> &str {
        "parses the User-Agent header out of a raw HTTP request"
    }

    fn pipe_descriptors(&self) -> &[PipeDescriptor] {
        &self.pds
    }

    fn exec(&self, ctx: &mut TaskContext<'_>) -> Result<ExecOutcome> {
        let raw = read_all(ctx, 0)?;
        let text = String::from_utf8_lossy(&raw);
        let user_agent = text
            .lines()
            .find_map(|line| line.strip_prefix("User-Agent: "))
            .unwrap_or("world")
            .trim();
        ctx.pipe_write(1, user_agent.as_bytes())?;
        Ok(ExecOutcome::Done)
    }
}

struct ResGen {
    pds: Vec<PipeDescriptor>,
}

impl ResGen {
    fn new() -> Self {
        Self {
            pds: vec![
                PipeDescriptor::new("request", Direction::Input),
                PipeDescriptor::new("response", Direction::Output),
            ],
        }
    }
}

impl Servlet for ResGen {
    fn description(&self) -> &str {
        "renders a plain-text greeting as an HTTP/1.1 response"
    }

    fn pipe_descriptors(&self) -> &[PipeDescriptor] {
        &self.pds
    }

    fn exec(&self, ctx: &mut TaskContext<'_>) -> Result<ExecOutcome> {
        let raw = read_all(ctx, 0)?;
        let who = String::from_utf8_lossy(&raw);
        let body = format!("Hello, {who}!");
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        ctx.pipe_write(1, response.as_bytes())?;
        Ok(ExecOutcome::Done)
    }
}

/// Registers every bundled demo servlet under its `demo.*` name.
pub fn register(factory: &mut ServletFactory) {
    factory.register(ServletDescriptor::new("demo.reqparse", Arc::new(ReqParse::new())));
    factory.register(ServletDescriptor::new("demo.resgen", Arc::new(ResGen::new())));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_exec(servlet: &dyn Servlet, input: &[u8]) -> Vec<u8> {
        let mut task = Task::new(0, Action::Exec, 2);
        let mut writer = MemPipe::allocate_writer();
        writer.write(input);
        writer.finalize();
        task.bind_pipe(0, writer);
        let out_writer = MemPipe::allocate_writer();
        let mut out_reader = MemPipe::additional_reader(&out_writer).unwrap();
        task.bind_pipe(1, out_writer);

        let mut rls = Rls::new();
        let mut ctx = TaskContext::new(&mut task, &mut rls);
        let outcome = servlet.exec(&mut ctx).unwrap();
        assert!(matches!(outcome, ExecOutcome::Done));
        if let Some(handle) = task.pipe_mut(1) {
            handle.finalize();
        }

        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = out_reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn reqparse_extracts_the_user_agent() {
        let out = run_exec(&ReqParse::new(), b"GET / HTTP/1.1\r\nUser-Agent: curl/8\r\n\r\n");
        assert_eq!(out, b"curl/8");
    }

    #[test]
    fn reqparse_falls_back_to_world_without_a_user_agent_header() {
        let out = run_exec(&ReqParse::new(), b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(out, b"world");
    }

    #[test]
    fn resgen_renders_a_200_with_the_greeting_body() {
        let out = run_exec(&ResGen::new(), b"curl/8");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("Hello, curl/8!"));
    }
}
