//! Linear-chain CRF loss over emission scores.

use candle_core::Tensor;

use crate::error::{Result, SeqTagError};

/// Added to forbidden tag columns; `exp` of it underflows to zero in f32.
const FORBIDDEN_SCORE: f32 = -1e4;

/// Mean negative log-likelihood of the gold tag paths.
///
/// * `emissions` - `(B, T, C)` scores
/// * `transitions` - `(C, C)`, `[prev][curr]`
/// * `tag_ids` - padded gold tags `[B][T]`
/// * `lengths` - true sentence lengths; positions past them are ignored
/// * `forbidden` - tags the decoder never emits; they are left out of the
///   partition function so training normalizes over the same paths
///   Viterbi searches
///
/// Empty sentences contribute nothing.
pub fn crf_negative_log_likelihood(
    emissions: &Tensor,
    transitions: &Tensor,
    tag_ids: &[Vec<u32>],
    lengths: &[usize],
    forbidden: &[usize],
) -> Result<Tensor> {
    let (b, t, c) = emissions.dims3()?;
    if tag_ids.len() != b || lengths.len() != b {
        return Err(SeqTagError::LengthMismatch {
            what: "CRF batch rows",
            expected: b,
            found: tag_ids.len().min(lengths.len()),
        });
    }
    let device = emissions.device();
    if t == 0 {
        return Ok(Tensor::zeros((), emissions.dtype(), device)?);
    }

    let mask: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..t).map(move |i| if i < len { 1.0 } else { 0.0 }))
        .collect();
    let mask = Tensor::from_vec(mask, (b, t), device)?;

    // Score of the gold path: emissions + transitions along it.
    let tags: Vec<u32> = tag_ids.iter().flatten().copied().collect();
    let tags = Tensor::from_vec(tags, (b, t, 1), device)?;
    let emitted = emissions.contiguous()?.gather(&tags, 2)?.squeeze(2)?;
    let mut gold = (emitted * &mask)?.sum(1)?;
    if t > 1 {
        let pairs: Vec<u32> = tag_ids
            .iter()
            .flat_map(|row| row.windows(2).map(|w| w[0] * c as u32 + w[1]))
            .collect();
        let pairs = Tensor::from_vec(pairs, b * (t - 1), device)?;
        let moved = transitions
            .flatten_all()?
            .index_select(&pairs, 0)?
            .reshape((b, t - 1))?;
        gold = (gold + (moved * mask.narrow(1, 1, t - 1)?)?.sum(1)?)?;
    }

    // Partition function via the forward algorithm.
    let bias: Vec<f32> = (0..c)
        .map(|tag| if forbidden.contains(&tag) { FORBIDDEN_SCORE } else { 0.0 })
        .collect();
    let bias = Tensor::from_vec(bias, (1, 1, c), device)?;
    let emissions = emissions.broadcast_add(&bias)?;
    let step_transitions = transitions.unsqueeze(0)?;
    let mut alpha = emissions.narrow(1, 0, 1)?.squeeze(1)?;
    for step in 1..t {
        let scores = alpha.unsqueeze(2)?.broadcast_add(&step_transitions)?;
        let next = (log_sum_exp(&scores, 1)? + emissions.narrow(1, step, 1)?.squeeze(1)?)?;
        let keep = mask.narrow(1, step, 1)?;
        alpha = (next.broadcast_mul(&keep)? + alpha.broadcast_mul(&keep.affine(-1.0, 1.0)?)?)?;
    }
    let log_z = log_sum_exp(&alpha, 1)?;

    let non_empty = mask.narrow(1, 0, 1)?.squeeze(1)?;
    let count = lengths.iter().filter(|&&len| len > 0).count().max(1);
    let loss = ((log_z - gold)? * non_empty)?.sum_all()?;
    Ok((loss / count as f64)?)
}

fn log_sum_exp(xs: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    (sum + max)?.squeeze(dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_single_token_matches_softmax_nll() {
        let device = Device::Cpu;
        let emissions = Tensor::new(&[[[0.0f32, 1.0, 2.0]]], &device).unwrap();
        let transitions = Tensor::zeros((3, 3), candle_core::DType::F32, &device).unwrap();

        let loss = crf_negative_log_likelihood(&emissions, &transitions, &[vec![2]], &[1], &[]).unwrap();
        let expected = (0f32.exp() + 1f32.exp() + 2f32.exp()).ln() - 2.0;
        assert!((scalar(&loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_loss_is_positive_and_ignores_padding() {
        let device = Device::Cpu;
        let emissions = Tensor::new(
            &[
                [[0.5f32, 0.1], [0.2, 0.9], [7.0, -3.0]],
                [[0.3f32, 0.4], [0.0, 0.0], [0.0, 0.0]],
            ],
            &device,
        )
        .unwrap();
        let transitions = Tensor::new(&[[0.1f32, -0.2], [0.3, 0.0]], &device).unwrap();

        let tags = vec![vec![0, 1, 0], vec![1, 0, 0]];
        let loss = crf_negative_log_likelihood(&emissions, &transitions, &tags, &[2, 1], &[]).unwrap();
        assert!(scalar(&loss) > 0.0);

        // changing padded positions must not change the loss
        let padded = emissions.slice_assign(
            &[0..1, 2..3, 0..2],
            &Tensor::new(&[[[-9.0f32, 9.0]]], &device).unwrap(),
        );
        let loss2 =
            crf_negative_log_likelihood(&padded.unwrap(), &transitions, &tags, &[2, 1], &[]).unwrap();
        assert!((scalar(&loss) - scalar(&loss2)).abs() < 1e-5);
    }

    #[test]
    fn test_forbidden_tags_leave_the_partition() {
        let device = Device::Cpu;
        let emissions = Tensor::new(
            &[[[3.0f32, 0.2, -0.4], [2.5, 1.1, 0.3], [4.0, -0.7, 0.9]]],
            &device,
        )
        .unwrap();
        let transitions = Tensor::new(
            &[[0.5f32, 0.1, -0.3], [0.2, 0.4, -0.1], [0.7, 0.0, 0.6]],
            &device,
        )
        .unwrap();

        let full = crf_negative_log_likelihood(&emissions, &transitions, &[vec![1, 2, 1]], &[3], &[])
            .unwrap();
        let masked =
            crf_negative_log_likelihood(&emissions, &transitions, &[vec![1, 2, 1]], &[3], &[0])
                .unwrap();

        // same loss as a model that never had tag 0
        let reduced_emissions = emissions.narrow(2, 1, 2).unwrap().contiguous().unwrap();
        let reduced_transitions = transitions
            .narrow(0, 1, 2)
            .unwrap()
            .narrow(1, 1, 2)
            .unwrap()
            .contiguous()
            .unwrap();
        let reduced = crf_negative_log_likelihood(
            &reduced_emissions,
            &reduced_transitions,
            &[vec![0, 1, 0]],
            &[3],
            &[],
        )
        .unwrap();

        assert!((scalar(&masked) - scalar(&reduced)).abs() < 1e-4);
        assert!(scalar(&masked) < scalar(&full));
    }

    #[test]
    fn test_row_mismatch() {
        let device = Device::Cpu;
        let emissions = Tensor::zeros((2, 1, 2), candle_core::DType::F32, &device).unwrap();
        let transitions = Tensor::zeros((2, 2), candle_core::DType::F32, &device).unwrap();
        assert!(crf_negative_log_likelihood(&emissions, &transitions, &[vec![0]], &[1], &[]).is_err());
    }
}
