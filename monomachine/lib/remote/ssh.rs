use std::{fmt::Display, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    client::{self, Handle},
    ChannelMsg, Disconnect,
};
use russh_keys::key::PublicKey;
use typed_builder::TypedBuilder;

use crate::{config::DEFAULT_COMMAND_TIMEOUT, MachineError, MachineResult};

use super::Commander;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long to wait for the TCP connection and the SSH handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The extended data type code of stderr.
const STDERR_DATA_TYPE: u32 = 1;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs commands over an SSH session to the host.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SshCommander {
    /// The address of the host.
    #[builder(setter(into))]
    hostname: String,

    /// The SSH port.
    #[builder(default = 22)]
    port: u16,

    /// The remote user.
    #[builder(setter(into))]
    username: String,

    /// The private key used to authenticate.
    #[builder(default, setter(strip_option, into))]
    key_path: Option<PathBuf>,

    /// How long a single command may run, connection included.
    #[builder(default = DEFAULT_COMMAND_TIMEOUT)]
    timeout: Duration,

    /// How long to wait for the connection to come up.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
}

/// Freshly created machines have no host key on record, so every key is accepted.
struct AcceptAnyHostKey;

/// What one remote command produced.
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SshCommander {
    /// `user@host:port`, as shown in errors.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    fn unavailable(&self, reason: impl Display) -> MachineError {
        MachineError::BackendUnavailable(format!("ssh to {} failed: {reason}", self.target()))
    }

    async fn connect(&self) -> MachineResult<Handle<AcceptAnyHostKey>> {
        let config = Arc::new(client::Config::default());
        let address = (self.hostname.as_str(), self.port);

        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, address, AcceptAnyHostKey),
        )
        .await
        .map_err(|_| self.unavailable(format!("no connection within {:?}", self.connect_timeout)))?
        .map_err(|e| self.unavailable(e))?;

        let authenticated = match &self.key_path {
            Some(key_path) => {
                let key = russh_keys::load_secret_key(key_path, None).map_err(|e| {
                    MachineError::InvalidConfig(format!(
                        "cannot load ssh key {}: {e}",
                        key_path.display()
                    ))
                })?;
                session
                    .authenticate_publickey(self.username.as_str(), Arc::new(key))
                    .await
            }
            None => session.authenticate_none(self.username.as_str()).await,
        }
        .map_err(|e| self.unavailable(e))?;

        if !authenticated {
            return Err(self.unavailable("authentication rejected"));
        }

        Ok(session)
    }

    async fn exec(&self, command: &str) -> MachineResult<ExecOutput> {
        let session = self.connect().await?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| self.unavailable(e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.unavailable(e))?;

        let mut output = ExecOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext } if ext == STDERR_DATA_TYPE => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    output.exit_code = i32::try_from(exit_status).ok();
                }
                _ => {}
            }
        }

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::trace!(host = %self.hostname, "ssh disconnect: {e}");
        }

        Ok(output)
    }
}

impl ExecOutput {
    /// Stdout followed by stderr, the way a terminal would show them.
    fn combined(&self) -> String {
        let mut combined = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        combined
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait]
impl Commander for SshCommander {
    async fn run(&self, command: &str) -> MachineResult<String> {
        tracing::debug!(host = %self.hostname, "ssh: {command}");

        let output = tokio::time::timeout(self.timeout, self.exec(command))
            .await
            .map_err(|_| {
                MachineError::Timeout(format!(
                    "`{command}` on {} did not finish within {:?}",
                    self.target(),
                    self.timeout
                ))
            })??;

        let combined = output.combined();
        tracing::trace!(host = %self.hostname, "ssh output: {combined}");

        match output.exit_code {
            Some(0) => Ok(combined),
            exit_code => Err(MachineError::CommandFailed {
                command: command.to_string(),
                exit_code,
                output: combined,
            }),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;

    #[test]
    fn test_combined_output_puts_stderr_after_stdout() {
        let output = ExecOutput {
            stdout: b"out".to_vec(),
            stderr: b"err\n".to_vec(),
            exit_code: Some(0),
        };
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[test_log::test(tokio::test)]
    async fn test_refused_connection_is_backend_unavailable() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let commander = SshCommander::builder()
            .hostname("127.0.0.1")
            .port(port)
            .username("docker")
            .build();

        let result = commander.run("exit 0").await;
        assert!(
            matches!(
                result,
                Err(MachineError::BackendUnavailable(ref msg)) if msg.contains("docker@127.0.0.1")
            ),
            "{result:?}"
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_silent_server_hits_command_deadline() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let server = tokio::spawn(async move {
            if let Result::Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                while let Result::Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        let commander = SshCommander::builder()
            .hostname("127.0.0.1")
            .port(port)
            .username("docker")
            .timeout(Duration::from_millis(200))
            .build();

        let result = commander.run("uname -a").await;
        assert!(matches!(result, Err(MachineError::Timeout(_))), "{result:?}");

        server.abort();
        Ok(())
    }
}
