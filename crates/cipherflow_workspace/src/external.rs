// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes backed by an external process.
//!
//! The child gets the node input on stdin and its stdout becomes the node
//! output. It is killed as soon as the run is stopped.

use cipherflow_graph::{
    Configurable, ExecutionContext, NodeBehavior, NodeError, NodeInputs, NodeOutputs, PortType,
    PortValue,
};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default interval between completion checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An external program invocation
#[derive(Debug, Clone)]
pub struct ExternalTask {
    program: String,
    args: Vec<String>,
    poll_interval: Duration,
}

impl ExternalTask {
    /// Task running `program` without arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set how often the child is checked for completion and stop requests
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run to completion, feeding `input` and returning stdout
    pub fn run(&self, input: &[u8], ctx: &ExecutionContext) -> Result<Vec<u8>, NodeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NodeError::Failed(format!("Failed to start {}: {e}", self.program)))?;
        tracing::debug!(program = %self.program, pid = child.id(), "External task started");

        let writer = child.stdin.take().map(|mut stdin| {
            let input = input.to_vec();
            // Broken pipe just means the child stopped reading
            std::thread::spawn(move || {
                let _ = stdin.write_all(&input);
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.wait(&mut child, ctx) {
            Ok(status) => status,
            Err(error) => {
                // Pipes close once the child is dead
                let _ = join(stdout);
                let _ = join(stderr);
                return Err(error);
            }
        };

        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let output = join(stdout)?;
        let errors = join(stderr)?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&errors);
            return Err(NodeError::Failed(format!(
                "{} exited with {status}: {}",
                self.program,
                stderr.trim()
            )));
        }

        tracing::debug!(program = %self.program, bytes = output.len(), "External task finished");
        Ok(output)
    }

    fn wait(&self, child: &mut Child, ctx: &ExecutionContext) -> Result<ExitStatus, NodeError> {
        loop {
            if ctx.is_stopped() {
                tracing::info!(program = %self.program, "Killing external task");
                let _ = child.kill();
                let _ = child.wait();
                return Err(NodeError::Canceled);
            }

            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => std::thread::sleep(self.poll_interval),
                Err(e) => {
                    let _ = child.kill();
                    return Err(NodeError::Failed(format!(
                        "Failed to wait for {}: {e}",
                        self.program
                    )));
                }
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn join(handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>, NodeError> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    handle
        .join()
        .map_err(|_| NodeError::Failed("Pipe reader panicked".to_string()))?
        .map_err(|e| NodeError::Failed(format!("Failed to read pipe: {e}")))
}

/// Node behavior running an [`ExternalTask`]
#[derive(Debug, Clone)]
pub struct ExternalTaskBehavior {
    task: ExternalTask,
    input: String,
    output: String,
}

impl ExternalTaskBehavior {
    /// Feed port `input` to `task` and publish stdout on port `output`
    pub fn new(task: ExternalTask, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            task,
            input: input.into(),
            output: output.into(),
        }
    }
}

impl NodeBehavior for ExternalTaskBehavior {
    fn compute(
        &self,
        inputs: &NodeInputs,
        _settings: &dyn Configurable,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutputs, NodeError> {
        let value = inputs.require(&self.input)?;
        let bytes = match value.convert_to(&PortType::Bytes) {
            Some(PortValue::Bytes(bytes)) => bytes,
            _ => {
                return Err(NodeError::InvalidInput {
                    port: self.input.clone(),
                    reason: format!("{:?} cannot be sent to {}", value.port_type(), self.task.program),
                })
            }
        };

        ctx.report_progress(0.0, 1.0);
        let output = self.task.run(&bytes, ctx)?;
        ctx.report_progress(1.0, 1.0);

        Ok(NodeOutputs::new().with(self.output.clone(), PortValue::Bytes(output)))
    }
}
