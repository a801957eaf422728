use std::path::Path;
use std::time::Instant;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use imgfit_core::{
    fit_within, needs_alpha_flatten, ConversionRequest, ConversionSummary, ConvertError, ImageExtension, SizeLimit, TargetSize,
    TelemetryEvent, TelemetryEventType, TelemetrySink,
};

/// Bicubic resampling.
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Reads `input`, shrinks it into `size_limit` when it does not fit, and
/// writes it to `output` in the format named by the output extension.
pub fn convert(input: &Path, output: &Path, size_limit: SizeLimit) -> Result<(), ConvertError> {
    convert_detailed(input, output, Some(size_limit)).map(|_| ())
}

pub fn convert_request(request: &ConversionRequest) -> Result<ConversionSummary, ConvertError> {
    convert_detailed(&request.input, &request.output, request.size_limit)
}

pub fn convert_detailed(input: &Path, output: &Path, size_limit: Option<SizeLimit>) -> Result<ConversionSummary, ConvertError> {
    let start = Instant::now();
    if let Some(limit) = size_limit {
        limit.validate()?;
    }
    let format = output_format(output)?;

    let mut image = decode(input)?;
    let (width, height) = image.dimensions();
    let target = size_limit.and_then(|limit| fit_within(width, height, limit));

    let alpha_flattened = needs_alpha_flatten(input, output);
    if alpha_flattened {
        image = DynamicImage::ImageRgb8(image.to_rgb8());
    }
    if let Some(size) = target {
        image = image.resize_exact(size.width, size.height, RESIZE_FILTER);
    }

    image.save_with_format(output, format).map_err(|err| ConvertError::Encode {
        path: output.to_path_buf(),
        reason: err.to_string(),
    })?;

    Ok(ConversionSummary {
        original: TargetSize::new(width, height),
        written: target.unwrap_or(TargetSize::new(width, height)),
        resized: target.is_some(),
        alpha_flattened,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

pub fn convert_with_telemetry(
    request: &ConversionRequest,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<ConversionSummary, ConvertError> {
    let start = Instant::now();
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::ConvertStart,
            input: Some(request.input.clone()),
            duration_ms: None,
            detail: Some(format!("output={}", request.output.display())),
        });
    }
    match convert_request(request) {
        Ok(summary) => {
            if let Some(sink) = telemetry {
                sink.emit(TelemetryEvent {
                    event_type: TelemetryEventType::ConvertSuccess,
                    input: Some(request.input.clone()),
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(format!(
                        "original={},written={},resized={},alphaFlattened={}",
                        summary.original, summary.written, summary.resized, summary.alpha_flattened
                    )),
                });
            }
            Ok(summary)
        }
        Err(err) => {
            if let Some(sink) = telemetry {
                sink.emit(TelemetryEvent {
                    event_type: TelemetryEventType::ConvertError,
                    input: Some(request.input.clone()),
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(err.to_string()),
                });
            }
            Err(err)
        }
    }
}

fn decode(input: &Path) -> Result<DynamicImage, ConvertError> {
    if ImageExtension::from_path(input).is_some_and(|ext| !ext.is_raster()) {
        return Err(ConvertError::Decode {
            path: input.to_path_buf(),
            reason: "vector images cannot be decoded into a pixel buffer".to_string(),
        });
    }
    image::open(input).map_err(|err| ConvertError::Decode {
        path: input.to_path_buf(),
        reason: err.to_string(),
    })
}

fn output_format(output: &Path) -> Result<ImageFormat, ConvertError> {
    let encode_error = |reason: String| ConvertError::Encode {
        path: output.to_path_buf(),
        reason,
    };
    if ImageExtension::from_path(output).is_some_and(|ext| !ext.is_raster()) {
        return Err(encode_error("vector output is not supported".to_string()));
    }
    let format = ImageFormat::from_path(output).map_err(|err| encode_error(err.to_string()))?;
    if !format.writing_enabled() {
        return Err(encode_error(format!("no encoder available for {:?}", format)));
    }
    Ok(format)
}
