//! Encryption context generation utility.
//!
//! Generates a fresh homomorphic context for the configured preset and writes:
//! - the public export (no secret key) with 0644 permissions, for the compute server
//! - the client context sealed under a password with 0600 permissions
//!
//! # Usage
//!
//! ```bash
//! VITALSEAL_KEY_PASSWORD_FILE=/run/secrets/pw \
//!   cargo run --release --bin generate_context -- --out-public <path> --out-sealed <path> [--force]
//! ```
//!
//! # Security
//!
//! - The password is read from a file, never from argv
//! - The export is verified to be unable to decrypt before anything is written
//! - Only fingerprints are printed

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::io::Write;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use vitalseal::adapters::tfhe::TfheBackend;
use vitalseal::config::PipelineConfig;
use vitalseal::KeyManager;

const USAGE: &str =
    "Usage: generate_context --out-public <path> --out-sealed <path> [--force]";
const PASSWORD_FILE_ENV: &str = "VITALSEAL_KEY_PASSWORD_FILE";

fn fail(code: i32, message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(code);
}

/// Write `bytes` to `path` with exactly `mode`, also when the file already
/// existed with wider permissions.
fn write_file(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        opts.mode(mode);
    }

    let mut file = opts.open(path)?;
    // `mode` above only applies on creation.
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(bytes)
}

fn read_password() -> Zeroizing<String> {
    let path = std::env::var(PASSWORD_FILE_ENV)
        .unwrap_or_else(|_| fail(2, &format!("{PASSWORD_FILE_ENV} must point to a password file")));
    let raw = Zeroizing::new(
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| fail(2, &format!("Failed to read password file: {e}"))),
    );
    let password = Zeroizing::new(raw.trim_end_matches(['\r', '\n']).to_string());
    if password.is_empty() {
        fail(2, "Password file is empty");
    }
    password
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut out_public: Option<PathBuf> = None;
    let mut out_sealed: Option<PathBuf> = None;
    let mut force = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out-public" | "--out-sealed" => {
                let p = args.next().unwrap_or_default();
                if p.is_empty() {
                    fail(2, USAGE);
                }
                if arg == "--out-public" {
                    out_public = Some(PathBuf::from(p));
                } else {
                    out_sealed = Some(PathBuf::from(p));
                }
            }
            "--force" => force = true,
            "-h" | "--help" => {
                println!(
                    "{USAGE}\n\nWrites the public context export to --out-public (0644) and the password-sealed client context to --out-sealed (0600). The password is read from ${PASSWORD_FILE_ENV}. Prints only fingerprints."
                );
                return;
            }
            _ => fail(2, &format!("Unknown arg: {arg}\n{USAGE}")),
        }
    }

    let (Some(out_public), Some(out_sealed)) = (out_public, out_sealed) else {
        fail(2, USAGE);
    };

    if out_public == out_sealed {
        fail(2, "--out-public and --out-sealed must be different paths");
    }

    for path in [&out_public, &out_sealed] {
        if path.exists() && !force {
            fail(3, &format!("Refusing to overwrite existing file {path:?}. Use --force."));
        }
    }

    let password = read_password();
    let config = PipelineConfig::from_env_or_default();
    for note in &config.ignored {
        eprintln!("{note}");
    }

    let manager = KeyManager::new(TfheBackend::new());
    let context = manager
        .create_context(config.params.clone())
        .unwrap_or_else(|e| fail(1, &format!("Context generation failed: {e}")));

    let export = manager
        .export_public(&context)
        .unwrap_or_else(|e| fail(1, &format!("Export failed: {e}")));
    let isolation = manager
        .verify_key_isolation(export.as_bytes(), &context)
        .unwrap_or_else(|e| fail(1, &format!("Key isolation check failed: {e}")));
    if !isolation.overall_pass {
        fail(1, "Public export failed the key isolation check; nothing written");
    }

    let sealed = manager
        .seal_client_context(&context, &password)
        .unwrap_or_else(|e| fail(1, &format!("Sealing failed: {e}")));

    write_file(&out_public, export.as_bytes(), 0o644)
        .unwrap_or_else(|e| fail(4, &format!("Failed to write {out_public:?}: {e}")));
    write_file(&out_sealed, &sealed, 0o600)
        .unwrap_or_else(|e| fail(4, &format!("Failed to write {out_sealed:?}: {e}")));

    // Print only non-secret material.
    println!("Wrote public context ({} bytes) to {:?}", export.as_bytes().len(), out_public);
    println!("Wrote sealed client context to {:?}", out_sealed);
    println!("PRESET={}", config.preset);
    println!("PUBLIC_FINGERPRINT={}", context.public_fingerprint());
}
