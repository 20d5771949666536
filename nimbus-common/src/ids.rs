//! Identifier and hardware-address generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// `<prefix>-xxxxxxxx` with lowercase alphanumerics, e.g. `r-k3x9a0qz`.
pub fn generate_uid(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}", prefix, suffix)
}

pub fn reservation_id() -> String {
    generate_uid("r")
}

pub fn instance_ec2_id() -> String {
    generate_uid("i")
}

pub fn volume_ec2_id() -> String {
    generate_uid("vol")
}

/// Locally administered MAC in the Xen OUI range: `02:16:3e:xx:xx:xx`.
pub fn generate_mac() -> String {
    let mut rng = rand::thread_rng();
    let octets = [
        0x02u8,
        0x16,
        0x3e,
        rng.gen_range(0x00..=0x7f),
        rng.gen::<u8>(),
        rng.gen::<u8>(),
    ];
    octets
        .iter()
        .map(|o| format!("{:02x}", o))
        .collect::<Vec<_>>()
        .join(":")
}
