//! Remote execution interface.
//!
//! The kernel never opens its own connections; every remote command and
//! file transfer goes through a [`RemoteExecutor`] supplied by the host.
//! An executor may fan work out across nodes internally; the kernel only
//! sees the aggregate, blocking result.

use std::path::Path;

use flotilla_core::Server;

use crate::error::ExecResult;

/// Result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Host-provided transport for commands and file transfer.
pub trait RemoteExecutor {
    fn execute(&self, server: &Server, command: &str) -> ExecResult<CommandOutput>;

    fn put_file(&self, server: &Server, local: &Path, remote: &Path) -> ExecResult<()>;
    fn get_file(&self, server: &Server, remote: &Path, local: &Path) -> ExecResult<()>;

    fn put_dir(&self, server: &Server, local: &Path, remote: &Path) -> ExecResult<()>;
    fn get_dir(&self, server: &Server, remote: &Path, local: &Path) -> ExecResult<()>;
}

pub mod scripted {
    //! In-memory executor for tests: replays scripted outputs and
    //! records every call.

    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use flotilla_core::Server;

    use super::{CommandOutput, RemoteExecutor};
    use crate::error::{ExecError, ExecResult};

    #[derive(Debug, Default)]
    pub struct ScriptedExecutor {
        outputs: Mutex<VecDeque<ExecResult<CommandOutput>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_ok(&self, stdout: &str) {
            self.outputs.lock().unwrap().push_back(Ok(CommandOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }));
        }

        pub fn push_failure(&self, message: &str) {
            let message = message.to_string();
            self.outputs
                .lock()
                .unwrap()
                .push_back(Err(ExecError::RemoteExecution {
                    server: "<scripted>".to_string(),
                    command: "<scripted>".to_string(),
                    message,
                }));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemoteExecutor for ScriptedExecutor {
        fn execute(&self, server: &Server, command: &str) -> ExecResult<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{server}: {command}"));
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(CommandOutput {
                        exit_code: 0,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                })
        }

        fn put_file(&self, server: &Server, local: &Path, remote: &Path) -> ExecResult<()> {
            self.calls.lock().unwrap().push(format!(
                "{server}: put {} -> {}",
                local.display(),
                remote.display()
            ));
            Ok(())
        }

        fn get_file(&self, server: &Server, remote: &Path, local: &Path) -> ExecResult<()> {
            self.calls.lock().unwrap().push(format!(
                "{server}: get {} -> {}",
                remote.display(),
                local.display()
            ));
            Ok(())
        }

        fn put_dir(&self, server: &Server, local: &Path, remote: &Path) -> ExecResult<()> {
            self.put_file(server, local, remote)
        }

        fn get_dir(&self, server: &Server, remote: &Path, local: &Path) -> ExecResult<()> {
            self.get_file(server, remote, local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedExecutor;
    use super::*;
    use flotilla_core::ServerRegistry;

    #[test]
    fn scripted_executor_replays_and_records() {
        let mut registry = ServerRegistry::new();
        let server = registry.intern("10.0.0.1", "node-a");
        let exec = ScriptedExecutor::new();
        exec.push_ok("pong");
        exec.push_failure("connection refused");

        let out = exec.execute(&server, "ping").unwrap();
        assert_eq!(out.stdout, "pong");
        assert!(out.success());

        assert!(exec.execute(&server, "ping").is_err());
        assert_eq!(exec.calls().len(), 2);
    }
}
