//! Cluster and step records exchanged between the engine and cluster workers.

pub mod cluster;
pub mod step;

pub use cluster::{ClusterEnv, ClusterSnapshot, ClusterSpec, ClusterState, ClusterUpdate};
pub use step::{FailureDetails, StepOutcome, StepSnapshot, StepSpec, StepState};

use rand::Rng;

const ID_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ID_LEN: usize = 13;

/// Generate an identifier such as `j-2AXXXXXXGAPLF`.
pub fn random_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_LEN)
        .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_shape() {
        let id = random_id("s-");
        assert!(id.starts_with("s-"));
        assert_eq!(id.len(), 15);
        assert!(id[2..].bytes().all(|b| ID_CHARS.contains(&b)));
    }
}
