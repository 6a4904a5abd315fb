use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

/// Angle search runs on a copy no larger than this on its longest side
const DETECTION_MAX_DIMENSION: u32 = 800;

/// Rotate the page so text rows are horizontal.
///
/// The skew angle maximizes the variance of the horizontal projection
/// profile within ±5°. Output is grayscale with the input dimensions.
pub fn apply(image: DynamicImage) -> DynamicImage {
    let gray = image.to_luma8();
    let angle = detect_skew_angle(&detection_copy(&gray));

    if angle.abs() < 0.1_f32.to_radians() {
        return DynamicImage::ImageLuma8(gray);
    }

    tracing::debug!("Correcting skew of {:.2}°", angle.to_degrees());
    let background = Luma([255u8]);
    let rotated = rotate_about_center(&gray, angle, Interpolation::Bilinear, background);

    DynamicImage::ImageLuma8(rotated)
}

fn detection_copy(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let longest = width.max(height);
    if longest <= DETECTION_MAX_DIMENSION {
        return gray.clone();
    }

    let scale = DETECTION_MAX_DIMENSION as f32 / longest as f32;
    image::imageops::resize(
        gray,
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
        FilterType::Triangle,
    )
}

/// Coarse search in 0.5° steps, then refine in 0.1° steps around the best
fn detect_skew_angle(img: &GrayImage) -> f32 {
    let mut best_angle = 0.0_f32;
    let mut best_variance = projection_variance(img, 0.0);

    for step in -10..=10 {
        let angle = step as f32 * 0.5;
        let variance = projection_variance(img, angle.to_radians());
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    let coarse = best_angle;
    for step in -5..=5 {
        let angle = coarse + step as f32 * 0.1;
        let variance = projection_variance(img, angle.to_radians());
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    best_angle.to_radians()
}

/// Variance of dark-pixel counts per row after rotating by `angle`
fn projection_variance(img: &GrayImage, angle: f32) -> f32 {
    let (width, height) = img.dimensions();
    if height == 0 {
        return 0.0;
    }

    let (sin_a, cos_a) = angle.sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let mut rows = vec![0u32; height as usize];

    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel.0[0] >= 128 {
            continue;
        }
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let row = (dy * cos_a - dx * sin_a + cy) as i32;
        if row >= 0 && row < height as i32 {
            rows[row as usize] += 1;
        }
    }

    let mean = rows.iter().sum::<u32>() as f32 / rows.len() as f32;
    rows.iter()
        .map(|&count| (count as f32 - mean).powi(2))
        .sum::<f32>()
        / rows.len() as f32
}
