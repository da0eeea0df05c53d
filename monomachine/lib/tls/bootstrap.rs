use std::path::Path;

use machutils::{shell_quote, write_file_command};
use tokio::fs;

use crate::{config::AuthOptions, provision::ProvisionTarget, MachineError, MachineResult};

use super::{
    is_certificate_pem, verify_server_certificate, CertUsage, CertificateAuthority, PemPair,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Names the server certificate of one host must cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    /// The host's logical name.
    pub hostname: String,

    /// The host's resolved address.
    pub ip: String,

    /// Additional names.
    pub extra_sans: Vec<String>,
}

/// Which certificates [`ensure_local_certificates`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertsWritten {
    /// A new CA was generated.
    pub ca: bool,

    /// A new client certificate was issued.
    pub client: bool,

    /// A new server certificate was issued.
    pub server: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CertRequest {
    /// A request for the target's name and address, plus the configured extra names.
    pub fn for_target(target: &ProvisionTarget, auth: &AuthOptions) -> Self {
        Self {
            hostname: target.get_machine_name().clone(),
            ip: target.get_ip().clone(),
            extra_sans: auth.get_server_cert_sans().clone(),
        }
    }

    /// The subject alternative names: address, name, `localhost`, then the extra names.
    pub fn server_sans(&self) -> Vec<String> {
        let mut sans: Vec<String> = Vec::new();
        let candidates = [self.ip.as_str(), self.hostname.as_str(), "localhost"]
            .into_iter()
            .chain(self.extra_sans.iter().map(String::as_str));

        for san in candidates {
            if !san.is_empty() && !sans.iter().any(|s| s == san) {
                sans.push(san.to_string());
            }
        }
        sans
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Makes sure the host's certificates exist locally and installs the engine's share on the host.
///
/// A valid CA is reused as is. The client certificate is issued when missing or when the CA was
/// just generated. The server certificate is also reissued when it expired, was not signed by the
/// CA or no longer covers the host's names, e.g. after the machine got a new address.
pub async fn bootstrap_certificates(
    target: &ProvisionTarget,
    auth: &AuthOptions,
    request: &CertRequest,
) -> MachineResult<CertsWritten> {
    let written = ensure_local_certificates(auth, request).await?;
    install_remote_certificates(target, auth).await?;
    Ok(written)
}

/// Issues a new server certificate and installs it on the host. With `regenerate_ca` the CA
/// and client certificate are replaced as well.
///
/// The engine has to be restarted afterwards to serve the new certificate.
pub async fn regenerate_certificates(
    target: &ProvisionTarget,
    auth: &AuthOptions,
    request: &CertRequest,
    regenerate_ca: bool,
) -> MachineResult<CertsWritten> {
    tracing::info!(
        "regenerating {} certificates for {}",
        if regenerate_ca { "all" } else { "server" },
        request.hostname
    );

    let mut stale = vec![auth.get_server_cert_path(), auth.get_server_key_path()];
    if regenerate_ca {
        stale.extend([
            auth.get_ca_cert_path(),
            auth.get_ca_key_path(),
            auth.get_client_cert_path(),
            auth.get_client_key_path(),
        ]);
    }
    for path in stale {
        remove_if_exists(path).await?;
    }

    bootstrap_certificates(target, auth, request).await
}

/// Creates whatever is missing from the host's local certificate directory.
pub async fn ensure_local_certificates(
    auth: &AuthOptions,
    request: &CertRequest,
) -> MachineResult<CertsWritten> {
    fs::create_dir_all(auth.get_cert_dir()).await?;
    let mut written = CertsWritten::default();

    let ca = match load_ca(auth).await? {
        Some(ca) => ca,
        None => {
            tracing::info!("creating CA in {}", auth.get_cert_dir().display());
            let (ca, pem) = CertificateAuthority::generate()?;
            write_pair(auth.get_ca_cert_path(), auth.get_ca_key_path(), &pem).await?;
            written.ca = true;
            ca
        }
    };

    if written.ca || !pair_exists(auth.get_client_cert_path(), auth.get_client_key_path()).await? {
        tracing::info!("creating client certificate for {}", request.hostname);
        let pem = ca.issue(CertUsage::Client, "client", Vec::new())?;
        write_pair(auth.get_client_cert_path(), auth.get_client_key_path(), &pem).await?;
        written.client = true;
    }

    let sans = request.server_sans();
    if written.ca || !server_certificate_is_current(auth, &sans).await? {
        tracing::info!(
            "creating server certificate for {} ({})",
            request.hostname,
            sans.join(", ")
        );
        let pem = ca.issue(CertUsage::Server, &request.hostname, sans)?;
        write_pair(auth.get_server_cert_path(), auth.get_server_key_path(), &pem).await?;
        written.server = true;
    }

    Ok(written)
}

/// Copies the CA certificate and the server certificate and key to their remote paths, readable
/// by root only.
pub async fn install_remote_certificates(
    target: &ProvisionTarget,
    auth: &AuthOptions,
) -> MachineResult<()> {
    let files = [
        (auth.get_ca_cert_path(), auth.get_remote_ca_cert_path()),
        (auth.get_server_cert_path(), auth.get_remote_server_cert_path()),
        (auth.get_server_key_path(), auth.get_remote_server_key_path()),
    ];

    if files.iter().any(|(_, remote)| remote.is_empty()) {
        return Err(MachineError::InvalidConfig(
            "remote certificate paths are not set".to_string(),
        ));
    }

    let remote_paths: Vec<String> = files.iter().map(|(_, r)| shell_quote(r)).collect();
    let mut dirs: Vec<String> = files
        .iter()
        .filter_map(|(_, remote)| remote.rsplit_once('/'))
        .map(|(dir, _)| shell_quote(if dir.is_empty() { "/" } else { dir }))
        .collect();
    dirs.dedup();

    target.run(&format!("sudo mkdir -p {}", dirs.join(" "))).await?;

    tracing::debug!("[{}] installing certificates", target.get_machine_name());
    for (local, remote) in &files {
        let contents = fs::read_to_string(local).await?;
        // Goes around `ProvisionTarget::run` so key material stays out of the logs.
        target
            .get_commander()
            .run(&write_file_command(remote, &contents))
            .await?;
    }

    let paths = remote_paths.join(" ");
    target
        .run(&format!("sudo chown root:root {paths} && sudo chmod 0600 {paths}"))
        .await?;
    Ok(())
}

async fn load_ca(auth: &AuthOptions) -> MachineResult<Option<CertificateAuthority>> {
    if !pair_exists(auth.get_ca_cert_path(), auth.get_ca_key_path()).await? {
        return Ok(None);
    }

    let cert = fs::read_to_string(auth.get_ca_cert_path()).await?;
    let key = fs::read_to_string(auth.get_ca_key_path()).await?;
    if !is_certificate_pem(&cert) {
        tracing::warn!(
            "{} is not a certificate, replacing the CA",
            auth.get_ca_cert_path().display()
        );
        return Ok(None);
    }

    match CertificateAuthority::from_key_pem(&key) {
        Ok(ca) => Ok(Some(ca)),
        Err(e) => {
            tracing::warn!("unusable CA key, replacing the CA: {e}");
            Ok(None)
        }
    }
}

async fn server_certificate_is_current(
    auth: &AuthOptions,
    sans: &[String],
) -> MachineResult<bool> {
    if !pair_exists(auth.get_server_cert_path(), auth.get_server_key_path()).await? {
        return Ok(false);
    }

    let cert = fs::read_to_string(auth.get_server_cert_path()).await?;
    let ca = fs::read_to_string(auth.get_ca_cert_path()).await?;
    match verify_server_certificate(&cert, &ca, sans) {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::info!("replacing {}: {e}", auth.get_server_cert_path().display());
            Ok(false)
        }
    }
}

async fn pair_exists(cert: &Path, key: &Path) -> MachineResult<bool> {
    Ok(fs::try_exists(cert).await? && fs::try_exists(key).await?)
}

async fn write_pair(cert_path: &Path, key_path: &Path, pem: &PemPair) -> MachineResult<()> {
    fs::write(cert_path, &pem.cert).await?;
    fs::write(key_path, &pem.key).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}

async fn remove_if_exists(path: &Path) -> MachineResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::remote::FakeCommander;

    fn fixture(dir: &Path) -> anyhow::Result<(ProvisionTarget, Arc<FakeCommander>, AuthOptions)> {
        let commander = Arc::new(FakeCommander::new());
        let target = ProvisionTarget::new("dev", "10.0.0.5", commander.clone());
        let auth = AuthOptions::for_cert_dir(dir.join("certs")).with_remote_dir("/etc/docker")?;
        Ok((target, commander, auth))
    }

    #[test_log::test(tokio::test)]
    async fn test_second_bootstrap_keeps_ca_byte_identical() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (target, _, auth) = fixture(dir.path())?;
        let request = CertRequest::for_target(&target, &auth);

        let first = bootstrap_certificates(&target, &auth, &request).await?;
        assert_eq!(first, CertsWritten { ca: true, client: true, server: true });
        let ca = fs::read(auth.get_ca_cert_path()).await?;
        let ca_key = fs::read(auth.get_ca_key_path()).await?;
        let server = fs::read(auth.get_server_cert_path()).await?;

        let second = bootstrap_certificates(&target, &auth, &request).await?;
        assert_eq!(second, CertsWritten::default());
        assert_eq!(fs::read(auth.get_ca_cert_path()).await?, ca);
        assert_eq!(fs::read(auth.get_ca_key_path()).await?, ca_key);
        assert_eq!(fs::read(auth.get_server_cert_path()).await?, server);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_new_address_reissues_server_certificate_under_same_ca() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (target, _, auth) = fixture(dir.path())?;
        bootstrap_certificates(&target, &auth, &CertRequest::for_target(&target, &auth)).await?;
        let ca = fs::read(auth.get_ca_cert_path()).await?;
        let ca_key = fs::read(auth.get_ca_key_path()).await?;
        let server = fs::read(auth.get_server_cert_path()).await?;

        let moved = ProvisionTarget::new("dev", "10.0.0.99", target.get_commander().clone());
        let request = CertRequest::for_target(&moved, &auth);
        let written = bootstrap_certificates(&moved, &auth, &request).await?;

        assert_eq!(written, CertsWritten { ca: false, client: false, server: true });
        assert_eq!(fs::read(auth.get_ca_cert_path()).await?, ca);
        assert_eq!(fs::read(auth.get_ca_key_path()).await?, ca_key);
        let reissued = fs::read_to_string(auth.get_server_cert_path()).await?;
        assert_ne!(reissued.as_bytes(), server.as_slice());
        verify_server_certificate(&reissued, &String::from_utf8(ca)?, &request.server_sans())?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_server_certificate_from_foreign_ca_is_replaced() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (target, _, auth) = fixture(dir.path())?;
        let request = CertRequest::for_target(&target, &auth);
        bootstrap_certificates(&target, &auth, &request).await?;

        let (foreign, _) = CertificateAuthority::generate()?;
        let pem = foreign.issue(CertUsage::Server, "dev", request.server_sans())?;
        write_pair(auth.get_server_cert_path(), auth.get_server_key_path(), &pem).await?;

        let written = ensure_local_certificates(&auth, &request).await?;
        assert_eq!(written, CertsWritten { ca: false, client: false, server: true });
        assert_ne!(fs::read_to_string(auth.get_server_cert_path()).await?, pem.cert);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_installs_engine_files_root_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (target, commander, auth) = fixture(dir.path())?;
        bootstrap_certificates(&target, &auth, &CertRequest::for_target(&target, &auth)).await?;

        let commands = commander.commands();
        assert_eq!(commands[0], "sudo mkdir -p /etc/docker");
        assert!(commands[1].ends_with("| sudo tee /etc/docker/ca.pem > /dev/null"));
        assert!(commands[2].ends_with("| sudo tee /etc/docker/server.pem > /dev/null"));
        assert!(commands[3].ends_with("| sudo tee /etc/docker/server-key.pem > /dev/null"));
        assert!(commands[4].contains(
            "sudo chmod 0600 /etc/docker/ca.pem /etc/docker/server.pem /etc/docker/server-key.pem"
        ));
        assert!(!commander.ran("ca-key.pem"));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_regenerate_replaces_server_but_keeps_ca() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (target, _, auth) = fixture(dir.path())?;
        let request = CertRequest::for_target(&target, &auth);
        bootstrap_certificates(&target, &auth, &request).await?;
        let ca = fs::read(auth.get_ca_cert_path()).await?;
        let server = fs::read(auth.get_server_cert_path()).await?;

        let written = regenerate_certificates(&target, &auth, &request, false).await?;
        assert_eq!(written, CertsWritten { ca: false, client: false, server: true });
        assert_eq!(fs::read(auth.get_ca_cert_path()).await?, ca);
        assert_ne!(fs::read(auth.get_server_cert_path()).await?, server);

        let written = regenerate_certificates(&target, &auth, &request, true).await?;
        assert!(written.ca && written.client && written.server);
        assert_ne!(fs::read(auth.get_ca_cert_path()).await?, ca);
        Ok(())
    }

    #[test]
    fn test_server_sans_are_deduplicated() {
        let request = CertRequest {
            hostname: "dev".into(),
            ip: "10.0.0.5".into(),
            extra_sans: vec!["dev".into(), "dev.example.com".into()],
        };
        assert_eq!(
            request.server_sans(),
            vec!["10.0.0.5", "dev", "localhost", "dev.example.com"]
        );
    }
}
