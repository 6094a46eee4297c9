//! Product quantization of residual vectors.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::util::simd;
use crate::vector::index::kmeans::{self, KMeansConfig};

/// Splits vectors into `n_subquantizers` contiguous subvectors and encodes
/// each one as the index of its nearest codeword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    sub_dimension: usize,
    /// `codebooks[subspace][code]` is a codeword of length `sub_dimension`.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Train one codebook of up to `2^bits` codewords per subspace.
    pub fn train(
        points: &[Vec<f32>],
        n_subquantizers: usize,
        bits: u8,
        iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        let dimension = points
            .first()
            .map(Vec::len)
            .ok_or_else(|| QuiverError::build("Cannot train a quantizer without vectors"))?;
        if n_subquantizers == 0 || dimension % n_subquantizers != 0 {
            return Err(QuiverError::build(format!(
                "{n_subquantizers} subquantizers do not divide dimension {dimension}"
            )));
        }
        if bits == 0 || bits > 8 {
            return Err(QuiverError::build(format!("Unsupported code width: {bits} bits")));
        }

        let sub_dimension = dimension / n_subquantizers;
        let codewords = 1usize << bits;

        let codebooks = (0..n_subquantizers)
            .into_par_iter()
            .map(|subspace| {
                let start = subspace * sub_dimension;
                let slices: Vec<&[f32]> = points
                    .iter()
                    .map(|point| &point[start..start + sub_dimension])
                    .collect();
                let subspace_seed = seed.wrapping_add(subspace as u64);
                let config = KMeansConfig::new(codewords, iterations, subspace_seed);
                kmeans::train(&slices, &config)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dimension,
            sub_dimension,
            codebooks,
        })
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        self.codebooks.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode a vector into one code per subspace.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        self.codebooks
            .iter()
            .enumerate()
            .map(|(subspace, codebook)| {
                let start = subspace * self.sub_dimension;
                let slice = &vector[start..start + self.sub_dimension];
                let (code, _) = kmeans::nearest(codebook, slice);
                code as u8
            })
            .collect()
    }

    /// Reconstruct the approximate vector for a code.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        for (codebook, &code) in self.codebooks.iter().zip(codes) {
            match codebook.get(code as usize) {
                Some(codeword) => out.extend_from_slice(codeword),
                None => out.extend(std::iter::repeat_n(0.0, self.sub_dimension)),
            }
        }
        out
    }

    /// Precompute squared distances from `query` to every codeword.
    pub fn distance_table(&self, query: &[f32]) -> DistanceTable {
        let width = self.codebooks.iter().map(Vec::len).max().unwrap_or(0);
        let mut table = vec![f32::INFINITY; self.codebooks.len() * width];
        for (subspace, codebook) in self.codebooks.iter().enumerate() {
            let start = subspace * self.sub_dimension;
            let sub_query = &query[start..start + self.sub_dimension];
            for (code, codeword) in codebook.iter().enumerate() {
                table[subspace * width + code] = simd::squared_l2(sub_query, codeword);
            }
        }
        DistanceTable { width, table }
    }
}

/// Asymmetric distance lookup table for one query.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    width: usize,
    table: Vec<f32>,
}

impl DistanceTable {
    /// Approximate squared distance between the query and an encoded vector.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(subspace, &code)| self.table[subspace * self.width + code as usize])
            .sum()
    }
}
