use crate::TrackError;
use nalgebra::{Point2, Point3};
use pattern_track_core::{mean_intensity, pad_uniform, to_gray, GrayImage, GrayImageView, ImageView};
use pattern_track_features::{Descriptor, FeatureExtractor, FeatureSet, Keypoint};

/// The reference image being tracked, with its features and outline.
///
/// Built once per registration and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub width: usize,
    pub height: usize,
    pub image: GrayImage,
    /// Uniform context border used during extraction, in pixels.
    pub margin: usize,
    /// Features in pattern pixel coordinates. Keypoints on the outline may
    /// sit slightly outside `[0, w) × [0, h)`.
    pub features: FeatureSet,
    /// Image-space outline `(0,0), (w,0), (w,h), (0,h)`.
    pub points2d: [Point2<f32>; 4],
    /// The outline on the `z = 0` plane, centred and scaled so the longer
    /// side spans `[-1, 1]`.
    pub points3d: [Point3<f64>; 4],
}

impl Pattern {
    /// Convert `image` to gray, extract its features and build the outlines.
    ///
    /// Extraction runs on the image surrounded by `margin` pixels of its mean
    /// intensity, so corners on the pattern outline get a full detector and
    /// descriptor neighbourhood.
    pub fn build(
        image: &ImageView<'_>,
        extractor: &dyn FeatureExtractor,
        margin: usize,
    ) -> Result<Self, TrackError> {
        let gray = to_gray(image)?;
        let view = GrayImageView {
            width: image.width,
            height: image.height,
            data: &gray,
        };
        let mut features = if margin == 0 {
            extractor.detect_and_describe(&view)
        } else {
            let padded = pad_uniform(&view, margin, mean_intensity(&view));
            extractor.detect_and_describe(&padded.view())
        };
        if features.is_empty() {
            return Err(TrackError::NoFeatures);
        }
        let m = margin as f32;
        for kp in &mut features.keypoints {
            *kp = kp.map_position(|p| Point2::new(p.x - m, p.y - m));
        }

        let (w, h) = (image.width as f32, image.height as f32);
        let max_side = w.max(h) as f64;
        let uw = w as f64 / max_side;
        let uh = h as f64 / max_side;

        Ok(Self {
            width: image.width,
            height: image.height,
            image: view.to_owned_image(),
            margin,
            features,
            points2d: [
                Point2::new(0.0, 0.0),
                Point2::new(w, 0.0),
                Point2::new(w, h),
                Point2::new(0.0, h),
            ],
            points3d: [
                Point3::new(-uw, -uh, 0.0),
                Point3::new(uw, -uh, 0.0),
                Point3::new(uw, uh, 0.0),
                Point3::new(-uw, uh, 0.0),
            ],
        })
    }

    #[inline]
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.features.keypoints
    }

    #[inline]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.features.descriptors
    }

    /// Size of the padded extraction canvas.
    #[inline]
    pub fn padded_size(&self) -> (usize, usize) {
        (self.width + 2 * self.margin, self.height + 2 * self.margin)
    }
}
