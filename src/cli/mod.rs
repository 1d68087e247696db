//! # Command Line Interface
//!
//! Role and credential administration plus issue and sign commands against a
//! file-backed store.

pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::certificates::KeyType;
use crate::config::AppConfig;
use crate::issuance::{
    IssuanceRequest, IssuanceService, IssueFields, IssueResponse, SignFields, SigningRequest,
};
use crate::roles::{AuthorityKind, Credential, RoleRegistry, RoleRequest};
use crate::secrets::SecretString;
use crate::storage::JsonFileStorage;

use output::{print_json, read_input};

#[derive(Parser)]
#[command(name = "certbroker")]
#[command(about = "Certificate issuance in front of on-prem, cloud and fake authorities")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store file override
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Role management commands
    Role {
        #[command(subcommand)]
        command: RoleCommands,
    },

    /// Credential management commands
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Issue a certificate and private key
    Issue {
        /// Role to issue against
        role: String,

        #[arg(long)]
        common_name: String,

        /// Comma-separated DNS names and email addresses
        #[arg(long)]
        alt_names: Option<String>,

        /// IP SAN, repeatable
        #[arg(long = "ip-san")]
        ip_sans: Vec<String>,

        #[arg(long)]
        organization: Option<String>,

        /// Key type override (rsa2048, rsa4096, ecdsa_p256, ecdsa_p384)
        #[arg(long)]
        key_type: Option<String>,

        /// Environment variable holding the private key passphrase
        #[arg(long)]
        key_password_env: Option<String>,
    },

    /// Have a role's authority sign a CSR
    Sign {
        role: String,

        /// PEM CSR file, `-` for standard input
        #[arg(long)]
        csr: String,

        /// Private key the CSR was made with, to check the signed certificate
        #[arg(long)]
        private_key: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum RoleCommands {
    /// Create or replace a role from a JSON document
    Put {
        name: String,

        /// JSON role fields, `-` for standard input
        #[arg(long)]
        file: String,
    },

    /// Create or replace a role from the CERTBROKER_* authority settings
    Seed {
        name: String,

        /// onprem, onprem_restricted, cloud, cloud_restricted or fake
        #[arg(long)]
        authority: String,
    },

    /// Show a role
    Get { name: String },

    /// List role names
    List,

    /// Delete a role
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Create or replace a credential from a JSON document
    Put {
        name: String,

        /// JSON credential fields, `-` for standard input
        #[arg(long)]
        file: String,
    },
}

/// Run CLI commands
pub async fn run_cli(config: AppConfig) -> Result<()> {
    let cli = Cli::parse();

    let mut config = config;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    let config = Arc::new(config);

    let storage = Arc::new(JsonFileStorage::new(config.store_path.clone()));
    let registry = RoleRegistry::new(storage);

    match cli.command {
        Commands::Role { command } => handle_role_command(command, &registry, &config).await?,
        Commands::Credential { command } => handle_credential_command(command, &registry).await?,
        Commands::Issue {
            role,
            common_name,
            alt_names,
            ip_sans,
            organization,
            key_type,
            key_password_env,
        } => {
            let key_password = match key_password_env {
                Some(var) => Some(SecretString::new(
                    std::env::var(&var).with_context(|| format!("{} is not set", var))?,
                )),
                None => None,
            };
            let key_type = key_type.map(|raw| raw.parse::<KeyType>()).transpose()?;
            let request = IssuanceRequest::from_fields(IssueFields {
                common_name,
                alt_names,
                ip_sans,
                key_password,
                organization,
                key_type,
            })?;

            let service = IssuanceService::with_default_connectors(config.clone(), registry);
            let bundle = service.issue(&role, &request).await?;
            print_json(&IssueResponse::from(bundle))?;
        }
        Commands::Sign { role, csr, private_key } => {
            let private_key = match private_key {
                Some(path) => Some(SecretString::new(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read '{}'", path.display()))?,
                )),
                None => None,
            };
            let request = SigningRequest::from_fields(SignFields { csr: read_input(&csr)?, private_key })?;

            let service = IssuanceService::with_default_connectors(config.clone(), registry);
            let bundle = service.sign(&role, &request).await?;
            print_json(&IssueResponse::from(bundle))?;
        }
    }

    Ok(())
}

async fn handle_role_command(
    command: RoleCommands,
    registry: &RoleRegistry,
    config: &AppConfig,
) -> Result<()> {
    match command {
        RoleCommands::Put { name, file } => {
            let request: RoleRequest =
                serde_json::from_str(&read_input(&file)?).context("Invalid role JSON")?;
            let role = registry.write_role(&name, request).await?;
            print_json(&role)?;
        }
        RoleCommands::Seed { name, authority } => {
            let kind: AuthorityKind = authority.parse()?;
            let role = registry.write_role(&name, seed_request(kind, config)).await?;
            print_json(&role)?;
        }
        RoleCommands::Get { name } => print_json(&registry.get_role(&name).await?)?,
        RoleCommands::List => print_json(&registry.list_roles().await?)?,
        RoleCommands::Delete { name } => {
            registry.delete_role(&name).await?;
            println!("Deleted role '{}'", name);
        }
    }
    Ok(())
}

async fn handle_credential_command(command: CredentialCommands, registry: &RoleRegistry) -> Result<()> {
    match command {
        CredentialCommands::Put { name, file } => {
            let credential: Credential =
                serde_json::from_str(&read_input(&file)?).context("Invalid credential JSON")?;
            registry.put_credential(&name, &credential).await?;
            println!("Stored credential '{}'", name);
        }
    }
    Ok(())
}

/// Role fields taken from the configured authority settings.
pub fn seed_request(kind: AuthorityKind, config: &AppConfig) -> RoleRequest {
    let authorities = &config.authorities;
    let mut request = RoleRequest { authority: Some(kind.to_string()), ..Default::default() };

    match kind {
        AuthorityKind::OnPrem | AuthorityKind::OnPremRestricted => {
            let onprem = &authorities.onprem;
            request.tpp_url = onprem.url.clone();
            request.tpp_user = onprem.user.clone();
            request.tpp_password = onprem.password.clone();
            request.access_token = onprem.access_token.clone();
            request.refresh_token = onprem.refresh_token.clone();
            request.trust_bundle_file = onprem.trust_bundle_file.clone();
            request.zone = if kind.is_restricted() {
                onprem.restricted_zone.clone()
            } else {
                onprem.zone.clone()
            };
        }
        AuthorityKind::Cloud | AuthorityKind::CloudRestricted => {
            let cloud = &authorities.cloud;
            request.cloud_url = cloud.url.clone();
            request.apikey = cloud.apikey.clone();
            request.zone = if kind.is_restricted() {
                cloud.restricted_zone.clone()
            } else {
                cloud.zone.clone()
            };
        }
        AuthorityKind::Fake => request.fakemode = true,
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnPremSettings;

    #[test]
    fn seed_uses_restricted_zone() {
        let mut config = AppConfig::default();
        config.authorities.onprem = OnPremSettings {
            url: Some("https://tpp.example.com".into()),
            zone: Some("Open".into()),
            restricted_zone: Some("Locked".into()),
            ..Default::default()
        };

        let request = seed_request(AuthorityKind::OnPremRestricted, &config);
        assert_eq!(request.zone.as_deref(), Some("Locked"));
        assert_eq!(request.authority.as_deref(), Some("onprem_restricted"));

        let fake = seed_request(AuthorityKind::Fake, &config);
        assert!(fake.fakemode);
    }

    #[test]
    fn cli_parses_issue() {
        let cli = Cli::try_parse_from([
            "certbroker",
            "issue",
            "web",
            "--common-name",
            "a.example.com",
            "--ip-san",
            "10.0.0.1",
            "--ip-san",
            "10.0.0.2",
        ])
        .unwrap();
        match cli.command {
            Commands::Issue { role, ip_sans, .. } => {
                assert_eq!(role, "web");
                assert_eq!(ip_sans.len(), 2);
            }
            _ => panic!("expected issue command"),
        }
    }
}
