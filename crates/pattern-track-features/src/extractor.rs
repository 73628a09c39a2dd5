use crate::FeatureSet;
use pattern_track_core::GrayImageView;

/// Keypoint detection plus description over a grayscale image.
///
/// Implementations must be deterministic for a given configuration: the same
/// image always yields the same keypoints and descriptors, so the pattern and
/// the frames are described in a comparable way.
pub trait FeatureExtractor: Send {
    /// Detect keypoints and compute their descriptors.
    ///
    /// Keypoints for which no descriptor can be computed are dropped, so the
    /// returned set is always index-aligned.
    fn detect_and_describe(&self, image: &GrayImageView<'_>) -> FeatureSet;
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for Box<T> {
    fn detect_and_describe(&self, image: &GrayImageView<'_>) -> FeatureSet {
        (**self).detect_and_describe(image)
    }
}
