//! Image preparation ahead of local recognition
//!
//! Only the geometric correction requested through [`RecognitionOptions`]
//! is applied; everything else is left to the engine.

pub mod deskew;

use crate::engine::RecognitionOptions;
use image::DynamicImage;

/// Image ready for recognition plus the names of the steps that ran
pub struct Prepared {
    pub image: DynamicImage,
    pub steps: Vec<&'static str>,
}

/// Apply the corrections the caller asked for.
///
/// Document unwarping and orientation classification both map to a skew
/// correction pass; the flags are otherwise inert.
pub fn prepare(image: DynamicImage, options: &RecognitionOptions) -> Prepared {
    let mut steps = Vec::new();
    let mut image = image;

    if options.use_doc_unwarping || options.use_doc_orientation_classify {
        image = deskew::apply(image);
        steps.push("deskew");
    }

    Prepared { image, steps }
}
