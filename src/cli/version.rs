/// Display version information
pub fn execute() {
    println!("quorum-signer {}", env!("CARGO_PKG_VERSION"));
    println!("Threshold signing coordinator (FROST Ed25519)");
}
