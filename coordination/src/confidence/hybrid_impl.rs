//! Hybrid (Jaccard + semantic embedding) confidence.
//!
//! Semantic similarity is computed from caller-supplied embedding
//! vectors — this crate has no embedding client of its own; an embedding
//! API key is an external collaborator.

use super::jaccard_impl::jaccard_confidence;
use super::ConfidenceMethod;

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// Hybrid confidence: `0.3 * jaccard + 0.7 * semantic`, both 0..100,
/// rounded. Falls back to plain Jaccard (method=Jaccard) when fewer than
/// two embeddings are supplied or semantic validation is disabled by the
/// caller not providing embeddings at all.
pub fn hybrid_confidence(
    texts: &[String],
    embeddings: Option<&[Vec<f32>]>,
) -> (u8, ConfidenceMethod) {
    let jaccard = jaccard_confidence(texts);

    let embeddings = match embeddings {
        Some(e) if e.len() >= 2 => e,
        _ => return (jaccard, ConfidenceMethod::Jaccard),
    };

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            total += cosine_similarity(&embeddings[i], &embeddings[j]);
            pairs += 1;
        }
    }
    if pairs == 0 {
        return (jaccard, ConfidenceMethod::Jaccard);
    }

    let mean_cosine = total / pairs as f64;
    // Map -1..1 similarity to 0..100.
    let semantic_score = ((mean_cosine + 1.0) / 2.0 * 100.0).clamp(0.0, 100.0);

    let final_score = (0.3 * jaccard as f64 + 0.7 * semantic_score).round() as u8;
    (final_score, ConfidenceMethod::Hybrid)
}
