// src/file_encode.rs

use crate::error::ExtractError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// Extensions sent to the model as-is.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tiff"];

/// MIME type reported for every payload, whatever the real format is.
/// Kept as-is: the endpoint has always been fed this value.
pub const REPORTED_MIME_TYPE: &str = "image/png";

/// A file ready to be inlined into a model request.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFile {
    pub data: String,
    pub mime_type: &'static str,
}

/// Turn an uploaded image or PDF into a base64 payload.
///
/// Images are passed through byte-for-byte. For PDFs only the first page is
/// used, rendered to PNG.
pub fn encode_file(path: &Path) -> Result<EncodedFile, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let bytes = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        read(path)?
    } else if ext == "pdf" {
        render_first_page(&read(path)?)?
    } else {
        return Err(ExtractError::UnsupportedFileType(ext));
    };

    info!(ext = %ext, bytes = bytes.len(), "Encoded upload");
    Ok(EncodedFile {
        data: STANDARD.encode(&bytes),
        mime_type: REPORTED_MIME_TYPE,
    })
}

fn read(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::FileRead {
        path: path.display().to_string(),
        source,
    })
}

/// Rasterise page 1 of a PDF to PNG bytes.
///
/// pdfium draws the whole page (text, vector art and images). When the pdfium
/// shared library cannot be bound or refuses the document, the largest raster
/// image embedded in page 1 is used instead, which covers image-only scans.
fn render_first_page(pdf_bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let image = match rasterize_first_page(pdf_bytes) {
        Ok(image) => image,
        Err(pdfium_err) => {
            debug!(error = %pdfium_err, "pdfium render failed, using embedded page image");
            largest_embedded_image(pdf_bytes)
                .map_err(|e| ExtractError::PdfRender(format!("{pdfium_err}; {e}")))?
        }
    };

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ExtractError::PdfRender(format!("PNG encoding failed: {e}")))?;
    Ok(png)
}

/// One pixel per PDF point (72 dpi).
const PAGE_SCALE: f32 = 1.0;

fn rasterize_first_page(pdf_bytes: &[u8]) -> Result<DynamicImage, String> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| format!("pdfium library not available: {e:?}"))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| format!("pdfium could not open PDF: {e:?}"))?;
    let page = document
        .pages()
        .get(0)
        .map_err(|e| format!("pdfium could not load page 1: {e:?}"))?;
    let bitmap = page
        .render_with_config(&PdfRenderConfig::new().scale_page_by_factor(PAGE_SCALE))
        .map_err(|e| format!("pdfium could not render page 1: {e:?}"))?;

    let width = u32::try_from(bitmap.width()).map_err(|_| "pdfium bitmap width".to_string())?;
    let height = u32::try_from(bitmap.height()).map_err(|_| "pdfium bitmap height".to_string())?;
    debug!(width, height, "Rendered page 1 with pdfium");
    RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| "pdfium bitmap size mismatch".to_string())
}

/// Largest decodable image XObject on page 1.
fn largest_embedded_image(pdf_bytes: &[u8]) -> Result<DynamicImage, String> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| format!("failed to parse PDF: {e}"))?;

    let page_id = *doc
        .get_pages()
        .values()
        .next()
        .ok_or_else(|| "PDF has no pages".to_string())?;

    page_images(&doc, page_id)
        .into_iter()
        .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
        .ok_or_else(|| "first page has no decodable raster image".to_string())
}

fn page_images(doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|x| doc.dereference(x).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, obj)| decode_image(doc, obj))
        .collect()
}

/// Resources of a page, walking up the page tree when they are inherited.
fn page_resources(doc: &Document, node_id: ObjectId) -> Option<&Dictionary> {
    let node = doc.get_object(node_id).ok()?.as_dict().ok()?;
    if let Some(resources) = node
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
    {
        return Some(resources);
    }
    let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
    page_resources(doc, parent)
}

/// Colour spaces the embedded-image path can turn into pixels.
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    /// Palette entries expanded to RGB triples.
    Indexed(Vec<u8>),
}

fn color_space(doc: &Document, obj: Option<&Object>) -> Option<ColorSpace> {
    let Some(obj) = obj else {
        return Some(ColorSpace::Rgb);
    };
    let (_, obj) = doc.dereference(obj).ok()?;
    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorSpace::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorSpace::Rgb),
            _ => None,
        },
        Object::Array(arr) => match arr.first()?.as_name().ok()? {
            b"CalGray" => Some(ColorSpace::Gray),
            b"CalRGB" => Some(ColorSpace::Rgb),
            b"ICCBased" => {
                let (_, profile) = doc.dereference(arr.get(1)?).ok()?;
                let components = match profile {
                    Object::Stream(stream) => stream.dict.get(b"N").ok()?.as_i64().ok()?,
                    Object::Dictionary(dict) => dict.get(b"N").ok()?.as_i64().ok()?,
                    _ => return None,
                };
                match components {
                    1 => Some(ColorSpace::Gray),
                    3 => Some(ColorSpace::Rgb),
                    _ => None,
                }
            }
            b"Indexed" | b"I" => {
                let base = color_space(doc, arr.get(1))?;
                let (_, lookup) = doc.dereference(arr.get(3)?).ok()?;
                let table = match lookup {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(stream) => stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone()),
                    _ => return None,
                };
                let palette = match base {
                    ColorSpace::Rgb => table,
                    ColorSpace::Gray => table.iter().flat_map(|&g| [g, g, g]).collect(),
                    ColorSpace::Indexed(_) => return None,
                };
                Some(ColorSpace::Indexed(palette))
            }
            _ => None,
        },
        _ => None,
    }
}

fn decode_image(doc: &Document, obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    debug!(width, height, "Found image XObject");

    let filter = dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(arr) => arr.last().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    if filter == Some(b"DCTDecode".as_slice()) {
        return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok();
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    let space = color_space(doc, dict.get(b"ColorSpace").ok())?;

    match (space, bits) {
        (ColorSpace::Rgb, 8) => {
            RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8)
        }
        (ColorSpace::Gray, 1 | 2 | 4 | 8) => {
            let max = (1u16 << bits) - 1;
            let pixels = unpack_samples(&data, width, height, bits as usize)?
                .into_iter()
                .map(|s| (u16::from(s) * 255 / max) as u8)
                .collect();
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        (ColorSpace::Indexed(palette), 1 | 2 | 4 | 8) => {
            let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
            for index in unpack_samples(&data, width, height, bits as usize)? {
                let at = usize::from(index) * 3;
                pixels.extend_from_slice(palette.get(at..at + 3)?);
            }
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        (space, bits) => {
            debug!(?space, bits, "Unsupported image encoding");
            None
        }
    }
}

/// One sample per pixel from rows packed at `bits` per sample, each row padded
/// to a whole byte.
fn unpack_samples(data: &[u8], width: u32, height: u32, bits: usize) -> Option<Vec<u8>> {
    let (width, height) = (width as usize, height as usize);
    if bits == 8 {
        return data.get(..width * height).map(<[u8]>::to_vec);
    }

    let row_bytes = (width * bits).div_ceil(8);
    let mask = ((1u16 << bits) - 1) as u8;
    let mut samples = Vec::with_capacity(width * height);
    for row in data.chunks(row_bytes).take(height) {
        for x in 0..width {
            let bit = x * bits;
            let byte = *row.get(bit / 8)?;
            samples.push((byte >> (8 - bits - bit % 8)) & mask);
        }
    }
    (samples.len() == width * height).then_some(samples)
}
