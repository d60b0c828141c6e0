//! Preimage CLI Tool
//!
//! Generates Groth16 keys for the MiMC preimage relation, hashes preimages,
//! and produces or checks proofs independently of a relying party.

use anyhow::{anyhow, bail, Context};
use ark_ff::PrimeField;
use rand::rngs::OsRng;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process;
use zkpass_crypto::zk::{
    fr_from_bytes, fr_to_bytes, mimc_hash, proving_key_to_bytes, setup, verifying_key_to_bytes,
};
use zkpass_crypto::{Fr, Groth16PreimageVerifier, PreimageProof, PreimageProofVerifier, PreimageProver};

const PROVING_KEY_FILE: &str = "preimage.pk";
const VERIFYING_KEY_FILE: &str = "preimage.vk";

/// JSON output for setup command
#[derive(Debug, Serialize)]
struct SetupOutput {
    proving_key: String,
    verifying_key: String,
    success: bool,
}

/// JSON output for hash command
#[derive(Debug, Serialize)]
struct HashOutput {
    hash: String,
}

/// JSON output for prove command
#[derive(Debug, Serialize)]
struct ProveOutput {
    hash: String,
    proof: String,
}

/// JSON output for verify command
#[derive(Debug, Serialize)]
struct VerifyOutput {
    valid: bool,
    hash: String,
    message: String,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

/// Preimages are big-endian hex, reduced into the field.
fn parse_preimage(hex_str: &str) -> anyhow::Result<Fr> {
    let bytes =
        hex::decode(hex_str.trim_start_matches("0x")).context("Invalid preimage hex")?;
    if bytes.is_empty() || bytes.len() > 32 {
        bail!("Preimage must be 1 to 32 bytes");
    }
    Ok(Fr::from_be_bytes_mod_order(&bytes))
}

fn parse_hash(hex_str: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x")).context("Invalid hash hex")?;
    fr_from_bytes(&bytes).context("Invalid hash")?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

fn cmd_setup(out_dir: PathBuf, json: bool) -> anyhow::Result<()> {
    fs::create_dir_all(&out_dir).context("Failed to create output dir")?;

    let (pk, vk) = setup(&mut OsRng).context("Setup failed")?;
    let pk_path = out_dir.join(PROVING_KEY_FILE);
    let vk_path = out_dir.join(VERIFYING_KEY_FILE);

    fs::write(&pk_path, proving_key_to_bytes(&pk)?).context("Failed to write proving key")?;
    fs::write(&vk_path, verifying_key_to_bytes(&vk)?).context("Failed to write verifying key")?;

    if json {
        print_json(&SetupOutput {
            proving_key: pk_path.display().to_string(),
            verifying_key: vk_path.display().to_string(),
            success: true,
        })
    } else {
        println!("Proving key:   {}", pk_path.display());
        println!("Verifying key: {}", vk_path.display());
        Ok(())
    }
}

fn cmd_hash(preimage: String, json: bool) -> anyhow::Result<()> {
    let x = parse_preimage(&preimage)?;
    let hash = hex::encode(fr_to_bytes(&mimc_hash(x)));

    if json {
        print_json(&HashOutput { hash })
    } else {
        println!("MiMC hash: {}", hash);
        Ok(())
    }
}

fn cmd_prove(proving_key: PathBuf, preimage: String, json: bool) -> anyhow::Result<()> {
    let x = parse_preimage(&preimage)?;
    let prover =
        PreimageProver::from_file(&proving_key).context("Failed to load proving key")?;
    let proof = prover
        .prove(x, &mut OsRng)
        .context("Failed to generate proof")?;

    let hash = hex::encode(proof.public_hash);
    let blob = hex::encode(&proof.proof);

    if json {
        print_json(&ProveOutput { hash, proof: blob })
    } else {
        println!("Hash:  {}", hash);
        println!("Proof: {}", blob);
        Ok(())
    }
}

fn cmd_verify(
    verifying_key: PathBuf,
    hash: String,
    proof: String,
    json: bool,
) -> anyhow::Result<()> {
    let public_hash = parse_hash(&hash)?;
    let blob = hex::decode(proof.trim_start_matches("0x")).context("Invalid proof hex")?;
    let verifier = Groth16PreimageVerifier::from_file(&verifying_key)
        .context("Failed to load verifying key")?;

    let proof = PreimageProof {
        public_hash,
        proof: blob,
    };

    match verifier.verify(&public_hash, &proof) {
        Ok(()) => {
            if json {
                print_json(&VerifyOutput {
                    valid: true,
                    hash: hex::encode(public_hash),
                    message: "Proof is valid".to_string(),
                })?;
            } else {
                println!("✓ Proof is VALID");
                println!("  Hash: {}", hex::encode(public_hash));
            }
            Ok(())
        }
        Err(e) => {
            if json {
                print_json(&VerifyOutput {
                    valid: false,
                    hash: hex::encode(public_hash),
                    message: e.to_string(),
                })?;
            } else {
                println!("✗ Proof is INVALID: {}", e);
            }
            bail!("Proof verification failed")
        }
    }
}

fn print_usage() {
    println!("Preimage CLI - MiMC preimage proofs over BN254");
    println!();
    println!("USAGE:");
    println!("    preimage-cli setup --out-dir <dir> [--json]");
    println!("    preimage-cli hash --preimage <hex> [--json]");
    println!("    preimage-cli prove --proving-key <file> --preimage <hex> [--json]");
    println!("    preimage-cli verify --verifying-key <file> --hash <hex> --proof <hex> [--json]");
    println!();
    println!("COMMANDS:");
    println!("    setup     Generate a Groth16 proving/verifying key pair");
    println!("    hash      Compute MiMC(preimage)");
    println!("    prove     Prove knowledge of a preimage");
    println!("    verify    Verify a preimage proof against a hash");
}

/// Collect `--flag value` pairs and bare switches.
fn parse_flags(args: &[String]) -> (HashMap<String, String>, bool) {
    let mut values = HashMap::new();
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => json = true,
            flag if flag.starts_with("--") => {
                i += 1;
                if i < args.len() {
                    values.insert(flag.trim_start_matches("--").to_string(), args[i].clone());
                }
            }
            _ => {}
        }
        i += 1;
    }

    (values, json)
}

fn required(flags: &mut HashMap<String, String>, name: &str) -> anyhow::Result<String> {
    flags
        .remove(name)
        .ok_or_else(|| anyhow!("Missing --{} argument", name))
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Error: Usage: preimage-cli <command> [options]");
        println!();
        print_usage();
        process::exit(1);
    }

    let (mut flags, json) = parse_flags(&args[2..]);

    let result = match args[1].as_str() {
        "setup" => required(&mut flags, "out-dir").and_then(|dir| cmd_setup(PathBuf::from(dir), json)),
        "hash" => required(&mut flags, "preimage").and_then(|p| cmd_hash(p, json)),
        "prove" => match (
            required(&mut flags, "proving-key"),
            required(&mut flags, "preimage"),
        ) {
            (Ok(pk), Ok(preimage)) => cmd_prove(PathBuf::from(pk), preimage, json),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "verify" => match (
            required(&mut flags, "verifying-key"),
            required(&mut flags, "hash"),
            required(&mut flags, "proof"),
        ) {
            (Ok(vk), Ok(hash), Ok(proof)) => cmd_verify(PathBuf::from(vk), hash, proof, json),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
        },
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(anyhow!("Unknown command: {}", other)),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
