//! SIMD kernels for vector distance computation using the `wide` crate.
//!
//! Slices shorter than one lane group fall back to scalar loops. Callers are
//! responsible for passing slices of equal length.

use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::new(lanes)
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    if a.len() < LANES {
        return a.iter().zip(b).map(|(x, y)| x * y).sum();
    }

    let mut acc = f32x8::splat(0.0);
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    for (chunk_a, chunk_b) in chunks_a.zip(chunks_b) {
        acc = acc + load(chunk_a) * load(chunk_b);
    }

    acc.to_array().iter().sum::<f32>() + tail
}

/// Squared Euclidean distance of two equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    if a.len() < LANES {
        return a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum();
    }

    let mut acc = f32x8::splat(0.0);
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();

    for (chunk_a, chunk_b) in chunks_a.zip(chunks_b) {
        let diff = load(chunk_a) - load(chunk_b);
        acc = acc + diff * diff;
    }

    acc.to_array().iter().sum::<f32>() + tail
}

/// Euclidean norm of a slice.
pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Return a unit-length copy of `a`, or `a` unchanged when its norm is zero.
pub fn normalized(a: &[f32]) -> Vec<f32> {
    let n = norm(a);
    if n > 0.0 {
        a.iter().map(|x| x / n).collect()
    } else {
        a.to_vec()
    }
}
