//! Audio mimetype resolution.
//!
//! Every accepted upload maps onto one of six canonical mimetypes. Anything
//! outside that set resolves to an empty string.

use std::path::Path;

pub const AUDIO_AIFF: &str = "audio/aiff";
pub const AUDIO_FLAC: &str = "audio/flac";
pub const AUDIO_MP3: &str = "audio/mp3";
pub const AUDIO_MP4: &str = "audio/mp4";
pub const AUDIO_OGG: &str = "audio/ogg";
pub const AUDIO_WAV: &str = "audio/wave";

/// All canonical mimetypes, in no particular order.
pub const SUPPORTED: &[&str] = &[
    AUDIO_AIFF, AUDIO_FLAC, AUDIO_MP3, AUDIO_MP4, AUDIO_OGG, AUDIO_WAV,
];

/// Resolve a canonical mimetype from a filename.
///
/// Returns `""` when the extension is not a supported audio format.
pub fn resolve(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("aif") | Some("aiff") => AUDIO_AIFF,
        Some("flac") => AUDIO_FLAC,
        Some("mp3") => AUDIO_MP3,
        Some("m4a") => AUDIO_MP4,
        Some("ogg") => AUDIO_OGG,
        Some("wav") => AUDIO_WAV,
        _ => "",
    }
}

/// Resolve a canonical mimetype by sniffing magic numbers.
pub fn sniff(data: &[u8]) -> &'static str {
    let Some(kind) = infer::get(data) else {
        return "";
    };

    match kind.mime_type() {
        "audio/x-aiff" => AUDIO_AIFF,
        "audio/x-flac" => AUDIO_FLAC,
        "audio/mpeg" => AUDIO_MP3,
        "audio/m4a" | "video/mp4" => AUDIO_MP4,
        "audio/ogg" | "audio/opus" => AUDIO_OGG,
        "audio/x-wav" => AUDIO_WAV,
        _ => "",
    }
}

/// Filename first, content sniff as fallback.
///
/// Some encoders produce mp3 and m4a files that sniff as generic containers,
/// so a recognised extension always wins.
pub fn detect(filename: Option<&str>, data: &[u8]) -> &'static str {
    match filename.map(resolve) {
        Some(mimetype) if !mimetype.is_empty() => mimetype,
        _ => sniff(data),
    }
}

/// Canonical file extension (with leading dot) for a mimetype or one of its
/// common aliases. Returns `""` for unsupported mimetypes.
pub fn file_extension(mimetype: &str) -> &'static str {
    match mimetype.to_lowercase().as_str() {
        "audio/aiff" | "audio/x-aiff" => ".aif",
        "audio/flac" | "audio/x-flac" => ".flac",
        "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg-3" | "audio/mpeg" => ".mp3",
        "audio/mp4" | "audio/m4a" => ".m4a",
        "audio/ogg" => ".ogg",
        "audio/wave" | "audio/wav" | "audio/x-wav" => ".wav",
        _ => "",
    }
}

/// Whether the mimetype names a WAV container. The header still decides
/// whether the file can stand in for the canonical WAV.
pub fn is_wav_compatible(mimetype: &str) -> bool {
    file_extension(mimetype) == ".wav"
}

/// Whether the mimetype (or an alias of it) belongs to the supported set.
pub fn is_supported(mimetype: &str) -> bool {
    !file_extension(mimetype).is_empty()
}

/// Canonical mimetype for a mimetype or one of its aliases, `""` when
/// unsupported.
pub fn canonical(mimetype: &str) -> &'static str {
    match file_extension(mimetype) {
        ".aif" => AUDIO_AIFF,
        ".flac" => AUDIO_FLAC,
        ".mp3" => AUDIO_MP3,
        ".m4a" => AUDIO_MP4,
        ".ogg" => AUDIO_OGG,
        ".wav" => AUDIO_WAV,
        _ => "",
    }
}
