// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Timing and scoring helpers shared by the engines.

use std::time::Instant;
use tract_onnx::prelude::tract_ndarray::{Array2, Axis};

use crate::error::InferenceError;

/// Runs `forward` `repetitions` times and returns the total wall-clock seconds with the last output.
///
/// Only the forward passes are inside the timed region.
///
/// # Arguments
/// * `repetitions` - Number of passes, at least one pass is always made.
/// * `forward` - The forward pass over an already prepared batch.
pub fn timed_forward<F>(repetitions: usize, forward: F) -> (f64, Array2<f32>)
where
    F: Fn() -> Array2<f32>,
{
    let start_time = Instant::now();
    let mut output = forward();
    for _ in 1..repetitions {
        output = forward();
    }
    let latency = start_time.elapsed().as_secs_f64();
    (latency, output)
}

/// Arg-max class per row; ties resolve to the lowest index.
pub fn predicted_classes(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, best_val), (idx, &val)| {
                    if val > best_val {
                        (idx, val)
                    } else {
                        (best, best_val)
                    }
                })
                .0
        })
        .collect()
}

/// Fraction of rows whose predicted class equals the label. `None` when no labels exist.
pub fn accuracy(logits: &Array2<f32>, labels: Option<&[f32]>) -> Option<f64> {
    let labels = labels?;
    if labels.is_empty() {
        return None;
    }
    let correct = predicted_classes(logits)
        .iter()
        .zip(labels)
        .filter(|(&predicted, &label)| label >= 0.0 && label.round() as usize == predicted)
        .count();
    Some(correct as f64 / labels.len() as f64)
}

/// Rejects output that contains NaN or infinite values.
pub fn check_finite(logits: &Array2<f32>) -> Result<(), InferenceError> {
    if logits.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(InferenceError::Forward(
            "network produced non-finite outputs".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tract_onnx::prelude::tract_ndarray::arr2;

    #[test]
    fn test_timed_forward_repeats() {
        let calls = Cell::new(0);
        let (latency, output) = timed_forward(5, || {
            calls.set(calls.get() + 1);
            arr2(&[[calls.get() as f32]])
        });

        assert_eq!(calls.get(), 5);
        assert_eq!(output, arr2(&[[5.0]]));
        assert!(latency >= 0.0);
    }

    #[test]
    fn test_timed_forward_runs_at_least_once() {
        let calls = Cell::new(0);
        timed_forward(0, || {
            calls.set(calls.get() + 1);
            arr2(&[[0.0]])
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_predicted_classes() {
        let logits = arr2(&[[0.1, 0.9, 0.0], [2.0, 2.0, 1.0], [-1.0, -3.0, -0.5]]);
        assert_eq!(predicted_classes(&logits), vec![1, 0, 2]);
    }

    #[test]
    fn test_accuracy() {
        let logits = arr2(&[[0.1, 0.9], [0.8, 0.2], [0.3, 0.7], [0.6, 0.4]]);

        assert_eq!(accuracy(&logits, Some(&[1.0, 0.0, 0.0, 0.0])), Some(0.75));
        assert_eq!(accuracy(&logits, None), None);
        assert_eq!(accuracy(&logits, Some(&[])), None);
    }

    #[test]
    fn test_check_finite() {
        assert!(check_finite(&arr2(&[[1.0, -2.0]])).is_ok());
        assert!(matches!(
            check_finite(&arr2(&[[f32::NAN]])),
            Err(InferenceError::Forward(_))
        ));
    }
}
