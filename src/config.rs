//! Loads the configuration, from a JSON file and the environment.
//!
//! The file defaults to `data/config.json`, or the path in `CONFIG_PATH`. A
//! missing file means every value takes its default. Some values can then be
//! overridden from the environment, which the binary fills from a `.env` file
//! at the root before anything else:
//!
//! ```env
//! USUARIO_OC=jperez@telconet.ec
//! PASSWORD_OC=P@ssw0rd
//! POP_SERVER=pop.telconet.ec
//! POP_PORT=995
//! ```

use core::time::Duration;
use std::env::var;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::fetch::MailboxConnector;
use crate::fetch::connection::ImapConnector;
use crate::fetch::parser::normalize_addresses;
use crate::fetch::pop3::Pop3Connector;
use crate::report::ReporterSettings;
use crate::report::ladder::transport_ladder;

/// Senders accepted whatever the configuration says.
pub const BASE_SENDERS: [&str; 2] = ["jotoapanta@telconet.ec", "naf@telconet.ec"];

/// Mailbox access protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// IMAP over TLS, UID as token
    Imap,
    /// POP3 over TLS, UIDL as token
    #[default]
    Pop3,
}

/// Extra accepted senders, as a list or a `;`/`,` separated string.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SenderList {
    /// `"a@x.com; b@y.com"`
    Joined(String),
    /// `["a@x.com", "b@y.com"]`
    Many(Vec<String>),
}

impl SenderList {
    /// Returns the lowercased addresses.
    pub fn addresses(&self) -> Vec<String> {
        match self {
            Self::Joined(joined) => normalize_addresses(joined),
            Self::Many(list) => list.iter().flat_map(|item| normalize_addresses(item)).collect(),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of messages fetched per scan
    pub batch_size: usize,
    /// IMAP folder to scan
    pub carpeta: String,
    /// Destination of the reports
    pub correo_reporte: Option<String>,
    /// Directory of the state files
    pub data_dir: PathBuf,
    /// Number of fetch workers
    pub max_threads: usize,
    /// Mailbox password
    pub password: Option<String>,
    /// Mailbox server port, the protocol's usual port when unset
    pub pop_port: Option<u16>,
    /// Mailbox server
    pub pop_server: Option<String>,
    /// Mailbox protocol
    pub protocolo: Protocol,
    /// Additional accepted senders
    pub remitente_adicional: Option<SenderList>,
    /// Seconds between two cycles in watch mode
    pub scan_interval: u64,
    /// Dedicated submission password
    pub smtp_password: Option<String>,
    /// Port for plain submission
    pub smtp_plain_port: u16,
    /// Port for `STARTTLS` submission
    pub smtp_port: u16,
    /// Submission server
    pub smtp_server: String,
    /// Port for implicit TLS submission
    pub smtp_ssl_port: u16,
    /// Dedicated submission account
    pub smtp_usuario: Option<String>,
    /// Seconds before a network call is abandoned
    pub timeout: u64,
    /// Mailbox account, also the sender of the reports
    pub usuario: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 50,
            carpeta: "INBOX".to_owned(),
            correo_reporte: None,
            data_dir: PathBuf::from("data"),
            max_threads: 5,
            password: None,
            pop_port: None,
            pop_server: None,
            protocolo: Protocol::Pop3,
            remitente_adicional: None,
            scan_interval: Self::SCAN_INTERVAL_MIN,
            smtp_password: None,
            smtp_plain_port: 25,
            smtp_port: 587,
            smtp_server: "smtp.telconet.ec".to_owned(),
            smtp_ssl_port: 465,
            smtp_usuario: None,
            timeout: 60,
            usuario: None,
        }
    }
}

impl Config {
    /// Key id for the config file path in the environment.
    const CONFIG_PATH: &'static str = "CONFIG_PATH";
    /// Default config file.
    const CONFIG_PATH_DEFAULT: &'static str = "data/config.json";
    /// Usual port of IMAP over TLS.
    const IMAP_PORT_DEFAULT: u16 = 993;
    /// Key id for the mailbox protocol in the environment.
    const MAILBOX_PROTOCOL: &'static str = "MAILBOX_PROTOCOL";
    /// Key id for the mailbox password in the environment.
    const PASSWORD: &'static str = "PASSWORD_OC";
    /// Key id for the mailbox port in the environment.
    const POP_PORT: &'static str = "POP_PORT";
    /// Usual port of POP3 over TLS.
    const POP_PORT_DEFAULT: u16 = 995;
    /// Key id for the mailbox server in the environment.
    const POP_SERVER: &'static str = "POP_SERVER";
    /// Key id for the scan interval in the environment.
    const SCAN_INTERVAL: &'static str = "SCAN_INTERVAL";
    /// Shortest scan interval, in seconds.
    const SCAN_INTERVAL_MIN: u64 = 300;
    /// Key id for the mailbox account in the environment.
    const USUARIO: &'static str = "USUARIO_OC";

    /// Senders whose notifications are accepted: the base senders, the
    /// mailbox account and the configured extras.
    pub fn accepted_senders(&self) -> Vec<String> {
        let mut senders =
            BASE_SENDERS.iter().map(|sender| (*sender).to_owned()).collect::<Vec<_>>();
        if let Some(usuario) = &self.usuario {
            senders.extend(normalize_addresses(usuario));
        }
        if let Some(extra) = &self.remitente_adicional {
            senders.extend(extra.addresses());
        }
        senders
    }

    /// Applies the environment overrides.
    ///
    /// Unparsable ports and intervals fall back to their defaults.
    ///
    /// Variables are looked up in the process environment only, so a `.env`
    /// file must be loaded before.
    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(usuario) = lookup(Self::USUARIO) {
            self.usuario = Some(usuario);
        }
        if let Some(password) = lookup(Self::PASSWORD) {
            self.password = Some(password);
        }
        if let Some(server) = lookup(Self::POP_SERVER) {
            self.pop_server = Some(server);
        }
        if let Some(port) = lookup(Self::POP_PORT) {
            self.pop_port = port.trim().parse().ok();
        }
        if let Some(interval) = lookup(Self::SCAN_INTERVAL) {
            self.scan_interval = interval.trim().parse().unwrap_or(Self::SCAN_INTERVAL_MIN);
        }
        if let Some(protocol) = lookup(Self::MAILBOX_PROTOCOL) {
            self.protocolo = match protocol.trim().to_lowercase().as_str() {
                "pop3" | "pop" => Protocol::Pop3,
                "imap" => Protocol::Imap,
                _ => {
                    return Err(Error::InvalidVar {
                        key: Self::MAILBOX_PROTOCOL,
                        value: protocol,
                    });
                }
            };
        }
        Ok(())
    }

    /// Loads the configuration from `path`, or from the default file.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let lookup = |key: &str| var(key).ok();
        let path = path.map_or_else(
            || {
                lookup(Self::CONFIG_PATH)
                    .map_or_else(|| PathBuf::from(Self::CONFIG_PATH_DEFAULT), PathBuf::from)
            },
            Path::to_path_buf,
        );
        Self::load_with(&path, &lookup)
    }

    /// Loads the configuration from `path` with the given environment.
    fn load_with(path: &Path, lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = match fs::read(path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|source| Error::Invalid {
                path: path.to_path_buf(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(Error::Read {
                path: path.to_path_buf(),
                source,
            }),
        };
        config.apply_env(lookup)?;
        config.normalize();
        Ok(config)
    }

    /// Builds the mailbox adapter selected by `protocolo`.
    pub fn mailbox_connector(&self) -> Result<Arc<dyn MailboxConnector>, Error> {
        let server = required(self.pop_server.as_deref(), "pop_server")?;
        let usuario = required(self.usuario.as_deref(), "usuario")?;
        let password = required(self.password.as_deref(), "password")?;
        let port = self.mailbox_port();
        let timeout = self.timeout();
        Ok(match self.protocolo {
            Protocol::Pop3 => {
                Arc::new(Pop3Connector::new(server, port, usuario, password, timeout))
            }
            Protocol::Imap => Arc::new(ImapConnector::new(
                server,
                port,
                usuario,
                password,
                &self.carpeta,
                timeout,
            )),
        })
    }

    /// Mailbox server port: the configured one, else 993 for IMAP and 995
    /// for POP3.
    pub const fn mailbox_port(&self) -> u16 {
        match (self.pop_port, self.protocolo) {
            (Some(port), _) => port,
            (None, Protocol::Imap) => Self::IMAP_PORT_DEFAULT,
            (None, Protocol::Pop3) => Self::POP_PORT_DEFAULT,
        }
    }

    /// Clamps the values that have a lower bound.
    fn normalize(&mut self) {
        self.batch_size = self.batch_size.max(1);
        self.max_threads = self.max_threads.max(1);
        self.scan_interval = self.scan_interval.max(Self::SCAN_INTERVAL_MIN);
        self.timeout = self.timeout.max(1);
    }

    /// Submission settings: dedicated account first, then the mailbox one.
    pub fn reporter_settings(&self) -> ReporterSettings {
        let accounts =
            [(&self.smtp_usuario, &self.smtp_password), (&self.usuario, &self.password)]
                .into_iter()
                .filter_map(|pair| match pair {
                    (Some(user), Some(password))
                        if !user.trim().is_empty() && !password.is_empty() =>
                    {
                        Some((user.trim().to_owned(), password.clone()))
                    }
                    _ => None,
                })
                .collect();
        ReporterSettings {
            accounts,
            from: self.usuario.clone().unwrap_or_default(),
            host: self.smtp_server.clone(),
            ladder: transport_ladder(self.smtp_port, self.smtp_ssl_port, self.smtp_plain_port),
        }
    }

    /// Time between two cycles in watch mode.
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    /// Network timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Returns a required, non-empty value.
fn required<'value>(
    value: Option<&'value str>,
    key: &'static str,
) -> Result<&'value str, Error> {
    value.map(str::trim).filter(|value| !value.is_empty()).ok_or(Error::Missing(key))
}

/// Errors that may occur while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file is not valid JSON for a [`Config`].
    #[error("invalid config file {}: {source}", path.display())]
    Invalid {
        /// Config file
        path: PathBuf,
        /// Parse error
        source: serde_json::Error,
    },
    /// An environment variable holds an unusable value.
    #[error("invalid value `{value}` for {key}")]
    InvalidVar {
        /// Variable name
        key: &'static str,
        /// Value found
        value: String,
    },
    /// A required value is missing.
    #[error("missing configuration value `{0}`")]
    Missing(&'static str),
    /// The file exists but cannot be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use super::{Config, Error, Protocol, SenderList};
    use crate::report::ladder::Security;

    fn load(path: &Path, env: &[(&str, &str)]) -> Result<Config, Error> {
        let env = env
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        Config::load_with(path, &|key: &str| env.get(key).cloned())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn missing_file_gives_defaults() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("config.json"), &[])?;

        assert_eq!(config, Config::default());
        assert_eq!(
            (config.mailbox_port(), config.batch_size, config.max_threads),
            (995, 50, 5)
        );
        assert_eq!(config.scan_interval, 300);
        assert_eq!(config.smtp_server, "smtp.telconet.ec");
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn file_values_then_env_overrides() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "pop_server": "pop.file",
                "usuario": "file@telconet.ec",
                "batch_size": 0,
                "scan_interval": 60,
                "protocolo": "imap"
            }"#,
        )
        .unwrap();

        let env = [("USUARIO_OC", "env@telconet.ec"), ("POP_PORT", "1995")];
        let config = load(&path, &env)?;

        assert_eq!(config.pop_server.as_deref(), Some("pop.file"));
        assert_eq!(config.usuario.as_deref(), Some("env@telconet.ec"));
        assert_eq!(config.mailbox_port(), 1995);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.scan_interval, 300);
        assert_eq!(config.protocolo, Protocol::Imap);
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn bad_numeric_env_falls_back_to_defaults() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"pop_port": 1100, "scan_interval": 900}"#).unwrap();

        let config = load(&path, &[("POP_PORT", "abc"), ("SCAN_INTERVAL", "soon")])?;

        assert_eq!((config.mailbox_port(), config.scan_interval), (995, 300));
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn invalid_file_and_protocol_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path, &[]), Err(Error::Invalid { .. })));

        fs::write(&path, "{}").unwrap();
        let protocol = load(&path, &[("MAILBOX_PROTOCOL", "smoke")]);
        assert!(matches!(protocol, Err(Error::InvalidVar { .. })));
    }

    #[test]
    fn accepted_senders_merge_every_source() {
        let config = Config {
            usuario: Some("JPerez@Telconet.ec".to_owned()),
            remitente_adicional: Some(SenderList::Joined(
                "Compras <compras@x.com>; otro@y.com".to_owned(),
            )),
            ..Config::default()
        };
        assert_eq!(
            config.accepted_senders(),
            [
                "jotoapanta@telconet.ec",
                "naf@telconet.ec",
                "jperez@telconet.ec",
                "compras@x.com",
                "otro@y.com"
            ]
        );

        let listed = SenderList::Many(vec!["A@x.com".to_owned(), "b@x.com, c@x.com".to_owned()]);
        assert_eq!(listed.addresses(), ["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn smtp_account_comes_before_mailbox_account() {
        let config = Config {
            usuario: Some("buzon@telconet.ec".to_owned()),
            password: Some("b".to_owned()),
            smtp_usuario: Some("envios@telconet.ec".to_owned()),
            smtp_password: Some("a".to_owned()),
            ..Config::default()
        };
        let settings = config.reporter_settings();

        assert_eq!(
            settings.accounts,
            [
                ("envios@telconet.ec".to_owned(), "a".to_owned()),
                ("buzon@telconet.ec".to_owned(), "b".to_owned())
            ]
        );
        assert_eq!(settings.from, "buzon@telconet.ec");
        assert_eq!(settings.ladder[0].port, 587);
        assert_eq!(settings.ladder[1].security, Security::ImplicitTls);
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn mailbox_port_follows_protocol_unless_set() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{"protocolo": "imap"}"#).unwrap();
        assert_eq!(load(&path, &[])?.mailbox_port(), 993);
        assert_eq!(
            load(&path, &[("MAILBOX_PROTOCOL", "pop3")])?.mailbox_port(),
            995
        );
        assert_eq!(load(&path, &[("POP_PORT", "1143")])?.mailbox_port(), 1143);

        fs::write(&path, r#"{"protocolo": "imap", "pop_port": 10993}"#).unwrap();
        assert_eq!(load(&path, &[])?.mailbox_port(), 10993);
        assert_eq!(load(&path, &[("POP_PORT", "x")])?.mailbox_port(), 993);
        Ok(())
    }

    #[test]
    fn connector_requires_mailbox_credentials() {
        let config = Config {
            pop_server: Some("pop.telconet.ec".to_owned()),
            ..Config::default()
        };
        assert!(matches!(
            config.mailbox_connector(),
            Err(Error::Missing("usuario"))
        ));

        let complete = Config {
            usuario: Some("jperez@telconet.ec".to_owned()),
            password: Some("secret".to_owned()),
            ..config
        };
        assert!(complete.mailbox_connector().is_ok());
    }
}
