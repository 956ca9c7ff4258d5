use super::{escape_xml, RenderError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::render::svg;
use qrcode::QrCode;
use std::path::{Component, Path};

pub const CARD_WIDTH: u32 = 638;
pub const CARD_HEIGHT: u32 = 1013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Some(Side::Front),
            "back" => Some(Side::Back),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdCardFields {
    pub id: String,
    pub name: String,
    pub lrn: String,
    pub grade_level: String,
    pub section: String,
    pub adviser: String,
    pub school_year: String,
    pub guardian_name: String,
    pub guardian_phone: String,
}

/// Pre-resolved image hrefs; either data URIs or plain URLs.
#[derive(Debug, Clone, Default)]
pub struct IdCardImages {
    pub background: String,
    pub avatar: String,
}

pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "image/png",
    }
}

/// `<assets_dir>/<side>.png` as a data URI, or `None` when the file is absent.
pub fn load_background(assets_dir: &Path, side: Side) -> Option<String> {
    let path = assets_dir.join(format!("{}.png", side.as_str()));
    let bytes = std::fs::read(&path).ok()?;
    Some(data_uri(&bytes, "image/png"))
}

/// Avatar href for the photo box. Uploaded files (`/uploads/...`) are inlined,
/// other references pass through, and a blank avatar falls back to an initials
/// service URL built from the name.
pub fn resolve_avatar(
    avatar: Option<&str>,
    uploads_dir: &Path,
    name: &str,
    fallback_url: &str,
) -> String {
    let avatar = avatar.map(str::trim).filter(|a| !a.is_empty());
    if let Some(a) = avatar {
        if let Some(rel) = a.strip_prefix("/uploads/") {
            let rel = Path::new(rel);
            let contained = rel.components().all(|c| matches!(c, Component::Normal(_)));
            if contained {
                let path = uploads_dir.join(rel);
                if let Ok(bytes) = std::fs::read(&path) {
                    return data_uri(&bytes, image_mime(&path));
                }
            }
        } else {
            return a.to_string();
        }
    }
    let seed = if name.trim().is_empty() { "S" } else { name.trim() };
    format!("{}{}", fallback_url, percent_encode(seed))
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn qr_data_uri(payload: &str) -> Result<String, RenderError> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| RenderError::Qr(e.to_string()))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(400, 400)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(data_uri(image.as_bytes(), "image/svg+xml"))
}

fn text_box(y_box: u32, y_text: u32, text: &str) -> String {
    format!(
        r##"    <rect x="90" y="{y_box}" width="455" height="50" fill="white" />
    <text x="95" y="{y_text}" font-family="Arial, sans-serif" font-size="34" font-weight="900" fill="#000000" text-anchor="start">{text}</text>
"##,
        text = escape_xml(text)
    )
}

fn grade_section(fields: &IdCardFields) -> String {
    format!(
        "{} - {}",
        fields.grade_level.to_uppercase(),
        fields.section.to_uppercase()
    )
}

/// Renders one side of the student ID card as standalone SVG markup.
pub fn render_id_card(
    side: Side,
    fields: &IdCardFields,
    images: &IdCardImages,
) -> Result<String, RenderError> {
    let (w, h) = (CARD_WIDTH, CARD_HEIGHT);
    let mut svg = format!(
        r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
    <image width="{w}" height="{h}" href="{bg}" />
"#,
        bg = escape_xml(&images.background)
    );

    match side {
        Side::Front => {
            let qr_payload = if fields.id.trim().is_empty() {
                "N/A"
            } else {
                fields.id.as_str()
            };
            let qr = qr_data_uri(qr_payload)?;
            svg.push_str(&format!(
                r##"    <rect x="75" y="240" width="265" height="265" fill="white" />
    <image x="80" y="245" width="255" height="255" href="{avatar}" preserveAspectRatio="xMidYMid slice" />
    <rect x="75" y="240" width="265" height="265" fill="none" stroke="black" stroke-width="2" />
    <image x="375" y="240" width="200" height="200" href="{qr}" />
    <rect x="375" y="440" width="200" height="30" fill="white" />
    <text x="475" y="465" font-family="Arial, sans-serif" font-size="24" font-weight="bold" fill="#000000" text-anchor="middle">{lrn}</text>
"##,
                avatar = escape_xml(&images.avatar),
                qr = escape_xml(&qr),
                lrn = escape_xml(&fields.lrn),
            ));
            svg.push_str(&text_box(525, 565, &fields.name.to_uppercase()));
            svg.push_str(&text_box(625, 665, &grade_section(fields)));
            svg.push_str(&text_box(725, 765, &fields.adviser.to_uppercase()));
            svg.push_str(&format!(
                r##"    <rect x="200" y="935" width="240" height="50" fill="#1e3a8a" />
    <text x="{cx}" y="975" font-family="Arial, sans-serif" font-size="32" font-weight="bold" fill="#ffffff" text-anchor="middle">{year}</text>
"##,
                cx = w / 2,
                year = escape_xml(&fields.school_year),
            ));
        }
        Side::Back => {
            svg.push_str(&text_box(335, 375, &fields.guardian_name.to_uppercase()));
            svg.push_str(&text_box(435, 475, &fields.guardian_phone));
            svg.push_str(&text_box(535, 575, &grade_section(fields)));
        }
    }

    svg.push_str("</svg>");
    Ok(svg)
}
