use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Configuration for the deterministic bag-of-words hash embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Deterministic text embedder: hashed token counts, L2-normalized.
///
/// Identical input text always yields the identical vector, which is the
/// contract the record store relies on. Quality is intentionally modest; the
/// OpenAI backend in `claimlens_rag` is the higher-fidelity option.
#[derive(Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        for token in text.split_whitespace() {
            let bucket = self.bucket_for(token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions()
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_identical_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_eq!(
            embedder.embed_text("dinner with wine"),
            embedder.embed_text("dinner with wine")
        );
    }

    #[test]
    fn vectors_have_configured_dimensionality() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 16,
            seed: 7,
        });
        assert_eq!(embedder.embed_text("taxi fare").len(), 16);
        assert_eq!(embedder.embed_text("").len(), 16);
    }

    #[test]
    fn nonempty_vectors_are_unit_length() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let vector = embedder.embed_text("hotel two nights breakfast included");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
