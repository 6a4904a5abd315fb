//! OCRS engine implementation
//!
//! Local fallback recognizer using the ocrs library. No system dependencies
//! required; neural network models are downloaded on first start.
//!
//! The ocrs engine only needs `&self` to recognize, so one instance is
//! shared by all requests. Recognition is CPU bound and runs on the blocking
//! pool; a semaphore caps how many recognitions run at once.

use crate::config::FallbackConfig;
use crate::confidence::{self, EMBEDDED_TEXT_CONFIDENCE};
use crate::engine::{OcrMethod, OcrOutcome, OcrRequest, RecognitionOptions, Recognizer, TextLine};
use crate::error::RecognizerError;
use crate::preprocessing;
use async_trait::async_trait;
use image::DynamicImage;
use ocrs::{DecodeMethod, ImageSource, OcrEngine as OcrsOcrEngine, OcrEngineParams, TextItem};
use rten::Model;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default model URLs from the ocrs project
const DETECTION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten";
const RECOGNITION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten";

/// Languages the bundled recognition model reads
const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "eng"];

/// Embedded PDF text shorter than this is treated as a scanned document
const MIN_EMBEDDED_TEXT_LEN: usize = 10;

/// Fallback recognizer wrapping the ocrs library
pub struct OcrsEngine {
    engine: Arc<OcrsOcrEngine>,
    permits: Arc<Semaphore>,
    default_language: String,
}

impl OcrsEngine {
    /// Load models (downloading them if needed) and build the engine
    pub fn new(config: &FallbackConfig) -> Result<Self, RecognizerError> {
        tracing::info!("Initializing ocrs OCR engine...");

        let detection_model_path =
            ensure_model_downloaded(DETECTION_MODEL_URL, "text-detection.rten")?;
        let recognition_model_path =
            ensure_model_downloaded(RECOGNITION_MODEL_URL, "text-recognition.rten")?;

        let detection_model = Model::load_file(&detection_model_path).map_err(|e| {
            RecognizerError::Unavailable(format!("Failed to load detection model: {}", e))
        })?;
        let recognition_model = Model::load_file(&recognition_model_path).map_err(|e| {
            RecognizerError::Unavailable(format!("Failed to load recognition model: {}", e))
        })?;

        let engine = OcrsOcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            decode_method: DecodeMethod::Greedy,
            ..Default::default()
        })
        .map_err(|e| RecognizerError::Unavailable(format!("Failed to create OCR engine: {}", e)))?;

        if !is_supported_language(&config.default_language) {
            tracing::warn!(
                "OCR language '{}' is not supported by ocrs, recognizing with the Latin model",
                config.default_language
            );
        }

        tracing::info!(
            "ocrs engine initialized (max {} concurrent recognitions)",
            config.max_concurrent
        );

        Ok(Self {
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            default_language: config.default_language.clone(),
        })
    }

    /// Warnings for requested options this engine cannot honor
    fn option_warnings(&self, options: &RecognitionOptions) -> Vec<String> {
        let mut warnings = Vec::new();

        let lang = options.lang.as_deref().unwrap_or(&self.default_language);
        if !is_supported_language(lang) {
            warnings.push(format!(
                "Language '{}' is not supported by the local engine; used the Latin model",
                lang
            ));
        }
        if let Some(version) = &options.ocr_version {
            warnings.push(format!(
                "OCR version '{}' ignored; the local engine has a single recognition model",
                version
            ));
        }
        if options.use_textline_orientation {
            warnings.push("Text line orientation classification is not supported".to_string());
        }

        warnings
    }
}

#[async_trait]
impl Recognizer for OcrsEngine {
    fn method(&self) -> OcrMethod {
        OcrMethod::Fallback
    }

    fn name(&self) -> &'static str {
        "ocrs"
    }

    async fn attempt(&self, request: &OcrRequest) -> Result<OcrOutcome, RecognizerError> {
        let engine = Arc::clone(&self.engine);
        let bytes = request.bytes.clone();
        let options = request.options.clone();
        let is_pdf = request.is_pdf();
        let warnings = self.option_warnings(&options);

        let outcome = run_limited(&self.permits, move || {
            let recognizer = Recognition { engine: &engine };
            if is_pdf {
                recognizer.pdf(&bytes, &options)
            } else {
                recognizer.image_bytes(&bytes, &options)
            }
        })
        .await??;

        Ok(outcome.with_warnings(warnings))
    }
}

/// Run `work` on the blocking pool, holding one permit until it returns.
///
/// The permit moves into the blocking task, so dropping the returned future
/// does not free the slot while the work is still running.
async fn run_limited<T, F>(permits: &Arc<Semaphore>, work: F) -> Result<T, RecognizerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let permit = Arc::clone(permits)
        .acquire_owned()
        .await
        .map_err(|e| RecognizerError::Unavailable(e.to_string()))?;

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    })
    .await
    .map_err(|e| RecognizerError::Engine(format!("Recognition task failed: {}", e)))
}

/// Blocking recognition against a borrowed engine
struct Recognition<'a> {
    engine: &'a OcrsOcrEngine,
}

impl Recognition<'_> {
    fn image_bytes(&self, bytes: &[u8], options: &RecognitionOptions) -> Result<OcrOutcome, RecognizerError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| RecognizerError::Engine(format!("Failed to load image: {}", e)))?;

        let lines = self.lines(img, options)?;
        Ok(OcrOutcome::from_lines(OcrMethod::Fallback, lines))
    }

    /// Detect and recognize the text lines of one image
    fn lines(&self, img: DynamicImage, options: &RecognitionOptions) -> Result<Vec<TextLine>, RecognizerError> {
        let prepared = preprocessing::prepare(img, options);
        if !prepared.steps.is_empty() {
            tracing::debug!("Applied preprocessing: {}", prepared.steps.join(", "));
        }

        let rgb_img = prepared.image.into_rgb8();
        let dimensions = rgb_img.dimensions();

        let img_source = ImageSource::from_bytes(rgb_img.as_raw(), dimensions).map_err(|e| {
            RecognizerError::Engine(format!("Failed to create image source: {}", e))
        })?;

        let ocr_input = self
            .engine
            .prepare_input(img_source)
            .map_err(|e| RecognizerError::Engine(format!("Failed to prepare input: {}", e)))?;

        let word_rects = self
            .engine
            .detect_words(&ocr_input)
            .map_err(|e| RecognizerError::Engine(format!("Failed to detect words: {}", e)))?;

        let line_rects = self.engine.find_text_lines(&ocr_input, &word_rects);

        let line_texts = self
            .engine
            .recognize_text(&ocr_input, &line_rects)
            .map_err(|e| RecognizerError::Engine(format!("Failed to recognize text: {}", e)))?;

        // ocrs reports no recognition probabilities, so each line is scored
        // by the text-quality heuristic.
        let lines = line_texts
            .iter()
            .filter_map(|line| line.as_ref())
            .map(|line| {
                let text = line
                    .words()
                    .map(|word| word.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                let rect = line.bounding_rect();
                let (left, top) = (rect.left() as f32, rect.top() as f32);
                let (right, bottom) = (rect.right() as f32, rect.bottom() as f32);

                TextLine::new(text.as_str(), confidence::text_quality(&text)).with_polygon(vec![
                    [left, top],
                    [right, top],
                    [right, bottom],
                    [left, bottom],
                ])
            })
            .collect();

        Ok(lines)
    }

    /// Embedded text when the PDF has it, otherwise OCR of its images
    fn pdf(&self, bytes: &[u8], options: &RecognitionOptions) -> Result<OcrOutcome, RecognizerError> {
        let direct_text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| RecognizerError::Engine(format!("Failed to parse PDF: {}", e)))?;

        let trimmed_text = direct_text.trim();
        if trimmed_text.len() > MIN_EMBEDDED_TEXT_LEN {
            tracing::info!(
                "Extracted {} chars of text directly from PDF",
                trimmed_text.len()
            );
            let lines = trimmed_text
                .lines()
                .map(|line| TextLine::new(line, EMBEDDED_TEXT_CONFIDENCE))
                .collect();
            return Ok(OcrOutcome::from_lines(OcrMethod::Fallback, lines));
        }

        tracing::info!("PDF has no embedded text, attempting to extract images for OCR");
        let extraction = extract_images_from_pdf(bytes)?;
        recognize_pdf_images(extraction, |img| self.lines(img, options))
    }
}

/// Image XObjects of a PDF, split into decoded images and decode failures
#[derive(Debug)]
struct PdfImages {
    images: Vec<DynamicImage>,
    failures: Vec<String>,
}

impl PdfImages {
    fn found(&self) -> usize {
        self.images.len() + self.failures.len()
    }
}

/// OCR every decoded PDF image.
///
/// A PDF without text or images is a blank page. Images that exist but
/// cannot be decoded or recognized are an engine failure, unless at least
/// one image was recognized.
fn recognize_pdf_images<F>(extraction: PdfImages, mut recognize: F) -> Result<OcrOutcome, RecognizerError>
where
    F: FnMut(DynamicImage) -> Result<Vec<TextLine>, RecognizerError>,
{
    let mut warnings =
        vec!["PDF appears to be scanned/image-based, extracted images for OCR".to_string()];

    if extraction.found() == 0 {
        warnings.push("No text or images found in PDF".to_string());
        return Ok(OcrOutcome::from_lines(OcrMethod::Fallback, Vec::new()).with_warnings(warnings));
    }

    let found = extraction.found();
    let mut failures = extraction.failures;
    let mut recognized = 0;
    let mut lines = Vec::new();

    for (i, img) in extraction.images.into_iter().enumerate() {
        match recognize(img) {
            Ok(page_lines) => {
                recognized += 1;
                lines.extend(page_lines);
            }
            Err(e) => failures.push(format!("image {}: {}", i + 1, e)),
        }
    }

    if recognized == 0 {
        return Err(RecognizerError::Engine(format!(
            "None of the {} images in the PDF could be processed: {}",
            found,
            failures.join("; ")
        )));
    }

    warnings.extend(failures.into_iter().map(|reason| format!("Skipped PDF {}", reason)));
    Ok(OcrOutcome::from_lines(OcrMethod::Fallback, lines).with_warnings(warnings))
}

fn is_supported_language(lang: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&lang.to_lowercase().as_str())
}

/// Decode every image XObject in the PDF
fn extract_images_from_pdf(bytes: &[u8]) -> Result<PdfImages, RecognizerError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| RecognizerError::Engine(format!("Failed to load PDF: {}", e)))?;

    let mut extraction = PdfImages {
        images: Vec::new(),
        failures: Vec::new(),
    };
    for (object_id, object) in doc.objects.iter() {
        let Ok(stream) = object.as_stream() else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(|subtype| subtype.as_name())
            .map(|name| name == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        match decode_image_stream(&doc, stream) {
            Ok(img) => extraction.images.push(img),
            Err(e) => {
                tracing::warn!("Failed to extract image from object {:?}: {}", object_id, e);
                extraction
                    .failures
                    .push(format!("object {} {}: {}", object_id.0, object_id.1, e));
            }
        }
    }

    Ok(extraction)
}

/// Decode raw 8-bit gray, RGB or CMYK image data
fn decode_image_stream(
    doc: &lopdf::Document,
    stream: &lopdf::Stream,
) -> Result<DynamicImage, RecognizerError> {
    let dimension = |key: &[u8]| {
        stream
            .dict
            .get(key)
            .ok()
            .and_then(|v| v.as_i64().ok())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                RecognizerError::Engine(format!(
                    "Missing image {}",
                    String::from_utf8_lossy(key).to_lowercase()
                ))
            })
    };
    let width = dimension(b"Width")?;
    let height = dimension(b"Height")?;

    let bits_per_component = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|b| b.as_i64().ok())
        .unwrap_or(8);
    if bits_per_component != 8 {
        return Err(RecognizerError::Engine(format!(
            "Unsupported bits per component: {}",
            bits_per_component
        )));
    }

    let data = if stream.dict.has(b"Filter") {
        stream
            .decompressed_content()
            .map_err(|e| RecognizerError::Engine(format!("Failed to decompress image: {}", e)))?
    } else {
        stream.content.clone()
    };
    let pixels = width as usize * height as usize;
    let color_space = color_space(doc, stream);

    tracing::debug!(
        "PDF image: {}x{}, color_space={}, data_len={}",
        width,
        height,
        color_space,
        data.len()
    );

    let too_short = |channels: usize| {
        RecognizerError::Engine(format!(
            "Truncated {} image data: {} bytes, expected {}",
            color_space,
            data.len(),
            pixels * channels
        ))
    };

    match color_space.as_str() {
        "DeviceGray" => {
            if data.len() < pixels {
                return Err(too_short(1));
            }
            image::GrayImage::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| too_short(1))
        }
        // ICCBased with 3 components is typically RGB
        "DeviceRGB" | "ICCBased" => {
            if data.len() < pixels * 3 {
                return Err(too_short(3));
            }
            image::RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| too_short(3))
        }
        "DeviceCMYK" => {
            if data.len() < pixels * 4 {
                return Err(too_short(4));
            }
            let rgb: Vec<u8> = data[..pixels * 4]
                .chunks_exact(4)
                .flat_map(|cmyk| {
                    let k = 1.0 - cmyk[3] as f32 / 255.0;
                    let channel = |v: u8| ((1.0 - v as f32 / 255.0) * k * 255.0) as u8;
                    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
                })
                .collect();
            image::RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| too_short(4))
        }
        other => Err(RecognizerError::Engine(format!(
            "Unsupported color space: {}",
            other
        ))),
    }
}

/// Color space name of an image stream, resolving indirect references
fn color_space(doc: &lopdf::Document, stream: &lopdf::Stream) -> String {
    fn name_of(object: &lopdf::Object) -> Option<String> {
        if let Ok(name) = object.as_name() {
            return Some(String::from_utf8_lossy(name).to_string());
        }
        // Arrays like [/ICCBased ref]
        object
            .as_array()
            .ok()
            .and_then(|array| array.first())
            .and_then(|first| first.as_name().ok())
            .map(|name| String::from_utf8_lossy(name).to_string())
    }

    let Ok(object) = stream.dict.get(b"ColorSpace") else {
        return "DeviceRGB".to_string();
    };

    name_of(object)
        .or_else(|| {
            object
                .as_reference()
                .ok()
                .and_then(|reference| doc.get_object(reference).ok())
                .and_then(name_of)
        })
        .unwrap_or_else(|| "DeviceRGB".to_string())
}

/// Ensure model is downloaded and return its path
fn ensure_model_downloaded(url: &str, filename: &str) -> Result<PathBuf, RecognizerError> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("document-ocr-server");

    std::fs::create_dir_all(&cache_dir).map_err(|e| {
        RecognizerError::Unavailable(format!("Failed to create cache directory: {}", e))
    })?;

    let model_path = cache_dir.join(filename);

    if !model_path.exists() {
        tracing::info!("Downloading {} (this may take a moment)...", filename);
        download_file(url, &model_path)?;
        tracing::info!("Downloaded {} to {:?}", filename, model_path);
    } else {
        tracing::info!("Using cached model from {:?}", model_path);
    }

    Ok(model_path)
}

/// Download to a temporary name first so a partial file is never cached
fn download_file(url: &str, path: &Path) -> Result<(), RecognizerError> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| RecognizerError::Unavailable(format!("Failed to download model: {}", e)))?;

    let buffer = response.into_body().read_to_vec().map_err(|e| {
        RecognizerError::Unavailable(format!("Failed to read response body: {}", e))
    })?;

    let partial = path.with_extension("part");
    let mut file = File::create(&partial).map_err(|e| {
        RecognizerError::Unavailable(format!("Failed to create model file: {}", e))
    })?;
    file.write_all(&buffer).map_err(|e| {
        RecognizerError::Unavailable(format!("Failed to write model file: {}", e))
    })?;
    std::fs::rename(&partial, path).map_err(|e| {
        RecognizerError::Unavailable(format!("Failed to move model file into place: {}", e))
    })?;

    Ok(())
}
