use ndarray::{Array3, Zip};
use rayon::prelude::*;

/// A raw scanner volume as handed over by a [`VolumeSource`].
///
/// [`VolumeSource`]: crate::volume_loader::VolumeSource
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub data: Array3<f64>,
}

impl Volume {
    pub fn new(data: Array3<f64>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the volume in the array's axis order
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Intensities rescaled to [0, 1], see [`Normalizer::apply`].
    pub fn normalized(&self) -> Array3<f32> {
        Normalizer::apply(&self.data)
    }

    /// Voxel values interpreted as integer region labels.
    ///
    /// Non-finite and negative values become label 0, everything else is
    /// rounded to the nearest integer and saturates at `u32::MAX`.
    pub fn labels(&self) -> Array3<u32> {
        Zip::from(&self.data).par_map_collect(|&value| Self::to_label(value))
    }

    #[inline]
    fn to_label(value: f64) -> u32 {
        if value.is_finite() && value > 0.0 {
            value.round().min(u32::MAX as f64) as u32
        } else {
            0
        }
    }
}

/// Rescales raw intensities to the fixed [0.0, 1.0] range.
pub struct Normalizer;

impl Normalizer {
    /// Normalize an intensity array.
    ///
    /// NaN and both infinities are replaced by 0.0 before the minimum and
    /// maximum are taken. A volume whose sanitized values are all equal
    /// (including an empty one) normalizes to all zeros. Total over any input.
    ///
    /// Finite values whose span exceeds `f64::MAX` are halved before the
    /// subtraction so the range itself stays finite.
    pub fn apply(data: &Array3<f64>) -> Array3<f32> {
        let (min, max) = Self::bounds(data);
        if max > min {
            let scale = if (max - min).is_finite() { 1.0 } else { 0.5 };
            let low = min * scale;
            let range = max * scale - low;
            Zip::from(data).par_map_collect(|&value| {
                (((Self::sanitize(value) * scale - low) / range) as f32).clamp(0.0, 1.0)
            })
        } else {
            Array3::zeros(data.raw_dim())
        }
    }

    #[inline]
    fn sanitize(value: f64) -> f64 {
        if value.is_finite() { value } else { 0.0 }
    }

    fn bounds(data: &Array3<f64>) -> (f64, f64) {
        data.par_iter()
            .map(|&value| Self::sanitize(value))
            .fold(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |(min, max), value| (min.min(value), max.max(value)),
            )
            .reduce(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, ShapeBuilder, arr3};
    use proptest::prelude::*;

    #[test]
    fn uniform_volume_flattens_to_zero() {
        let data = Array3::from_elem((3, 2, 4), 5.0);
        let normalized = Normalizer::apply(&data);
        assert_eq!(normalized.dim(), (3, 2, 4));
        assert!(normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn non_finite_values_count_as_zero() {
        let data = arr3(&[[[1.0, f64::NAN, 3.0]]]);
        let normalized = Normalizer::apply(&data);
        let values: Vec<f32> = normalized.iter().copied().collect();
        assert_eq!(values, vec![1.0 / 3.0, 0.0, 1.0]);
    }

    #[test]
    fn infinities_are_sanitized_before_bounds() {
        let data = arr3(&[[[f64::INFINITY, 2.0], [f64::NEG_INFINITY, 4.0]]]);
        let normalized = Normalizer::apply(&data);
        let values: Vec<f32> = normalized.iter().copied().collect();
        assert_eq!(values, vec![0.0, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn all_non_finite_volume_is_zero() {
        let data = Array3::from_elem((2, 2, 2), f64::NAN);
        assert!(Normalizer::apply(&data).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_volume_stays_empty() {
        let data = Array3::<f64>::zeros((0, 4, 4));
        assert_eq!(Normalizer::apply(&data).len(), 0);
    }

    #[test]
    fn fortran_ordered_input_keeps_logical_order() {
        let data = Array::from_shape_vec((2, 2, 2).f(), (0..8).map(f64::from).collect())
            .expect("shape matches");
        let normalized = Normalizer::apply(&data);
        for ((index, &raw), &scaled) in data.indexed_iter().zip(normalized.iter()) {
            assert_eq!(normalized[index], scaled);
            assert_eq!(scaled, (raw / 7.0) as f32);
        }
    }

    #[test]
    fn range_wider_than_f64_max_still_normalizes() {
        let data = arr3(&[[[-1.0e308, 0.0, 1.0e308, f64::MAX]]]);
        let values: Vec<f32> = Normalizer::apply(&data).iter().copied().collect();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)), "{values:?}");
        assert_eq!(values[0], 0.0);
        assert_eq!(values[3], 1.0);
        assert!((values[1] - 0.5).abs() < 0.01);
    }

    #[test]
    fn labels_are_rounded_and_clamped() {
        let volume = Volume::new(arr3(&[[[0.0, 1.4, 2.6], [-3.0, f64::NAN, 7.0]]]));
        let labels: Vec<u32> = volume.labels().iter().copied().collect();
        assert_eq!(labels, vec![0, 1, 3, 0, 0, 7]);
    }

    proptest! {
        #[test]
        fn normalized_values_stay_in_unit_range(
            values in proptest::collection::vec(
                prop_oneof![
                    -1.0e12f64..1.0e12,
                    proptest::num::f64::ANY,
                    Just(f64::NAN),
                    Just(f64::INFINITY),
                    Just(f64::NEG_INFINITY),
                ],
                1..64,
            )
        ) {
            let len = values.len();
            let data = Array3::from_shape_vec((1, 1, len), values).unwrap();
            let normalized = Normalizer::apply(&data);
            prop_assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
