use sigver::audit::{self, AuditConfig, LogDestination};
use sigver::keyless::KeylessOutcome;
use sigver::trust_root::{DirectoryFetcher, TargetFetcher, TufHttpFetcher, SIGSTORE_TUF_URL};
use sigver::{
    CertificateIdentity, DirectoryKeyLookup, EnvelopeCodec, KeylessVerifier, SVError,
    TrustRootMaterial, TrustRootProvider, VerificationPolicy, VerifiedIdentity, Verifier,
};

use sigver::reexports::log;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Helper function to read a whole file with a better error message
fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, SVError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        SVError::InvalidArgument(format!("Failed to read '{}': {}", path.display(), e))
    })
}

fn trust_root_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("tuf_url")
            .long("tuf-url")
            .value_name("url")
            .conflicts_with("trust_root_dir")
            .help("TUF repository serving trusted_root.json"),
    )
    .arg(
        Arg::new("tuf_root")
            .long("tuf-root")
            .value_name("file")
            .conflicts_with("trust_root_dir")
            .help("Trusted TUF root.json to start the repository walk from"),
    )
    .arg(
        Arg::new("trust_root_dir")
            .long("trust-root-dir")
            .value_name("dir")
            .help("Directory holding trusted_root.json"),
    )
    .arg(
        Arg::new("timeout")
            .long("timeout")
            .value_name("seconds")
            .value_parser(clap::value_parser!(u64))
            .help("Trust root fetch timeout"),
    )
}

fn trust_root_provider(matches: &ArgMatches) -> Result<Arc<TrustRootProvider>, SVError> {
    let fetcher: Arc<dyn TargetFetcher> = match matches.get_one::<String>("trust_root_dir") {
        Some(dir) => Arc::new(DirectoryFetcher::new(dir)),
        None => {
            let url = matches
                .get_one::<String>("tuf_url")
                .map(|s| s.as_str())
                .unwrap_or(SIGSTORE_TUF_URL);
            let mut fetcher = TufHttpFetcher::new(url);
            if let Some(root) = matches.get_one::<String>("tuf_root") {
                fetcher = fetcher.with_trusted_root(read_file(root)?);
            }
            Arc::new(fetcher)
        }
    };
    let mut provider = TrustRootProvider::new(fetcher);
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        provider = provider.with_timeout(Duration::from_secs(*secs));
    }
    Ok(Arc::new(provider))
}

fn keyless_policy(matches: &ArgMatches) -> Result<VerificationPolicy, SVError> {
    let mut policy = VerificationPolicy::default();

    let subject = matches.get_one::<String>("identity");
    let issuer = matches.get_one::<String>("issuer");
    match (issuer, subject) {
        (Some(issuer), Some(subject)) => {
            policy = policy.with_identity(CertificateIdentity::new(issuer, subject));
        }
        (None, None) => {}
        _ => {
            return Err(SVError::InvalidArgument(
                "--identity and --issuer must be given together".to_string(),
            ))
        }
    }

    if let Some(digest) = matches.get_one::<String>("digest") {
        let hex_digest = digest.strip_prefix("sha256:").unwrap_or(digest);
        let digest = hex::decode(hex_digest).map_err(|_| {
            SVError::InvalidArgument(format!("Invalid artifact digest: {}", digest))
        })?;
        if digest.len() != 32 {
            return Err(SVError::InvalidArgument(
                "Artifact digest must be a SHA-256 digest".to_string(),
            ));
        }
        policy = policy.with_artifact_digest(digest);
    }

    if let Some(threshold) = matches.get_one::<usize>("tlog_threshold") {
        policy = policy.with_tlog_threshold(*threshold);
    }
    if let Some(threshold) = matches.get_one::<usize>("sct_threshold") {
        policy = policy.with_sct_threshold(*threshold);
    }
    Ok(policy)
}

fn print_keyed(identities: &[VerifiedIdentity], json: bool) {
    if json {
        let ids: Vec<serde_json::Value> = identities
            .iter()
            .map(|i| {
                serde_json::json!({
                    "keyid": i.identifier,
                    "verified": i.verified,
                    "fingerprint": i.fingerprint,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "mode": "keyed", "identities": ids }));
        return;
    }
    if identities.is_empty() {
        println!("Envelope carries no signatures");
    }
    for identity in identities {
        println!(
            "Verified: {} ({})",
            identity.identifier,
            identity.fingerprint.as_deref().unwrap_or("-")
        );
    }
}

fn print_keyless(outcome: &KeylessOutcome, json: bool) {
    if json {
        let entries: Vec<serde_json::Value> = outcome
            .entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "logIndex": e.log_index,
                    "logId": e.log_id,
                    "integratedTime": e.integrated_time,
                    "inclusionProven": e.inclusion_proven,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "mode": "keyless",
                "mediaType": outcome.media_type,
                "subject": outcome.identity.subject,
                "issuer": outcome.identity.issuer,
                "authority": outcome.authority,
                "tlogEntries": entries,
                "timestamps": outcome.timestamps,
                "ctLogs": outcome.ct_logs,
            })
        );
        return;
    }
    println!(
        "Verified: {} (issuer {})",
        outcome.identity.subject,
        outcome.identity.issuer.as_deref().unwrap_or("unknown")
    );
    println!("Certificate authority: {}", outcome.authority);
    for entry in &outcome.entries {
        println!("Log entry: {} @ {}", entry.log_index, entry.log_id);
    }
    println!("CT logs: {}", outcome.ct_logs);
}

fn print_trust_root(material: &TrustRootMaterial) {
    println!("Format: {}", material.format_version);
    for ca in &material.certificate_authorities {
        println!("Certificate authority: {} ({} certificates)", ca.uri, ca.chain.len());
    }
    for log in &material.transparency_logs {
        println!("Transparency log: {} [{}]", log.base_url, log.log_id_hex());
    }
    println!("CT logs: {}", material.ct_logs.len());
    println!(
        "Timestamp authorities: {}",
        material.timestamp_authorities.len()
    );
}

fn start() -> Result<(), SVError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .action(ArgAction::SetTrue)
                .help("Enable structured audit logging (JSON to stderr)"),
        )
        .arg(
            Arg::new("audit-file")
                .long("audit-file")
                .value_name("FILE")
                .help("Write audit logs to FILE instead of stderr"),
        )
        .subcommand(trust_root_args(
            Command::new("verify")
                .about("Verify a DSSE envelope or a Sigstore bundle")
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .short('m')
                        .value_parser(["keyed", "keyless"])
                        .required(true)
                        .help("Trust model"),
                )
                .arg(
                    Arg::new("keys")
                        .long("keys")
                        .short('K')
                        .value_name("dir")
                        .help("Directory of <keyid>.pem public keys (keyed mode)"),
                )
                .arg(
                    Arg::new("identity")
                        .long("identity")
                        .value_name("subject")
                        .help("Expected certificate subject, '*' wildcards allowed"),
                )
                .arg(
                    Arg::new("issuer")
                        .long("issuer")
                        .value_name("url")
                        .help("Expected OIDC issuer"),
                )
                .arg(
                    Arg::new("digest")
                        .long("digest")
                        .value_name("sha256")
                        .help("Expected artifact SHA-256 digest, hex"),
                )
                .arg(
                    Arg::new("tlog_threshold")
                        .long("tlog-threshold")
                        .value_name("count")
                        .value_parser(clap::value_parser!(usize))
                        .help("Verified transparency log entries required"),
                )
                .arg(
                    Arg::new("sct_threshold")
                        .long("sct-threshold")
                        .value_name("count")
                        .value_parser(clap::value_parser!(usize))
                        .help("CT logs with a verified SCT required"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the result as JSON"),
                )
                .arg(
                    Arg::new("in")
                        .value_name("input_file")
                        .required(true)
                        .help("Envelope or bundle file"),
                ),
        ))
        .subcommand(trust_root_args(
            Command::new("trust-root").about("Fetch the keyless trust root and print a summary"),
        ))
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let audit_enabled = matches.get_flag("audit");
    let audit_file = matches.get_one::<String>("audit-file").map(|s| s.as_str());

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if audit_enabled || audit_file.is_some() {
        let destination = match audit_file {
            Some(path) => LogDestination::File(path.to_string()),
            None => LogDestination::Stderr,
        };
        audit::init(AuditConfig {
            destination,
            ..AuditConfig::default()
        })?;
    }

    if let Some(matches) = matches.subcommand_matches("verify") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or_else(|| SVError::InvalidArgument("Missing input file".to_string()))?;
        let payload = read_file(input_file)?;
        let json = matches.get_flag("json");

        match matches.get_one::<String>("mode").map(|s| s.as_str()) {
            Some("keyed") => {
                let dir = matches.get_one::<String>("keys").ok_or_else(|| {
                    SVError::InvalidArgument("Keyed mode needs --keys".to_string())
                })?;
                let lookup = DirectoryKeyLookup::open(dir)?;
                log::debug!("Loaded {} keys from {}", lookup.len(), dir);
                let verifier = Verifier::keyed(Arc::new(lookup), EnvelopeCodec::default());
                let identities = verifier.verify(&payload)?;
                print_keyed(&identities, json);
            }
            Some("keyless") => {
                let verifier = Verifier::from_keyless(KeylessVerifier::new(
                    trust_root_provider(matches)?,
                    keyless_policy(matches)?,
                ));
                let deadline = matches
                    .get_one::<u64>("timeout")
                    .map(|secs| Instant::now() + Duration::from_secs(*secs));
                let outcome = verifier.verify_keyless(&payload, deadline)?;
                print_keyless(&outcome, json);
            }
            _ => {
                return Err(SVError::InvalidArgument(
                    "--mode must be keyed or keyless".to_string(),
                ))
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("trust-root") {
        let material = trust_root_provider(matches)?.resolve()?;
        print_trust_root(&material);
    } else {
        return Err(SVError::InvalidArgument(
            "No subcommand specified; try --help".to_string(),
        ));
    }
    Ok(())
}

fn main() -> Result<(), SVError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
