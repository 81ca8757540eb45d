// src/tools/process_tool.rs

use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::Result;
use crate::exec::ChildProcess;

use super::{BoxFuture, Tool, ToolOutput};

/// A tool that is exactly one child process.
///
/// By default the result is the exit code; tools whose purpose is to produce
/// a file or directory (a configure step, an extractor) report that path.
#[derive(Debug)]
pub struct ProcessRunningTool {
    process: ChildProcess,
    produces: Option<PathBuf>,
    output: Mutex<ToolOutput>,
}

impl ProcessRunningTool {
    pub fn new(process: ChildProcess) -> Self {
        Self {
            process,
            produces: None,
            output: Mutex::new(ToolOutput::Nothing),
        }
    }

    pub fn producing(mut self, path: impl Into<PathBuf>) -> Self {
        self.produces = Some(path.into());
        self
    }

    pub fn process(&self) -> &ChildProcess {
        &self.process
    }
}

impl Tool for ProcessRunningTool {
    fn name(&self) -> String {
        self.process.name()
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.process.run()?;
            let code = self.process.join().await?;

            let output = match &self.produces {
                Some(path) => ToolOutput::Path(path.clone()),
                None => ToolOutput::ExitCode(code),
            };
            *self.output.lock().unwrap_or_else(|e| e.into_inner()) = output;
            Ok(())
        })
    }

    fn interrupt(&self) {
        self.process.interrupt();
    }

    fn result(&self) -> ToolOutput {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::StreamMode;

    #[tokio::test]
    async fn result_is_exit_code_or_path() {
        let tool = ProcessRunningTool::new(ChildProcess::shell("exit 3").success_codes([3]));
        tool.run().await.unwrap();
        assert_eq!(tool.result(), ToolOutput::ExitCode(3));

        let tool = ProcessRunningTool::new(ChildProcess::shell("true")).producing("out/dir");
        tool.run().await.unwrap();
        assert_eq!(tool.result().path(), Some(&PathBuf::from("out/dir")));
    }

    #[tokio::test]
    async fn failure_leaves_result_empty() {
        let tool = ProcessRunningTool::new(
            ChildProcess::shell("echo boom >&2; exit 1").stderr(StreamMode::Capture),
        );
        let err = tool.run().await.unwrap_err();
        assert!(!err.is_interrupted());
        assert_eq!(tool.result(), ToolOutput::Nothing);
        assert_eq!(tool.process().exit_code(), Some(1));
        assert_eq!(tool.process().captured_stderr(), "boom");
    }
}
