//! Best-effort EXIF transplant between JPEG files.
//!
//! Re-encoding drops every metadata segment. When the source is a JPEG, its
//! `APP1` Exif segment is lifted out once ([`ExifSegment::from_jpeg`]) and
//! spliced into each freshly encoded variant ([`ExifSegment::transplant`]).
//!
//! The transplant is a pure transform: `(segment, encoded) → bytes`. Any
//! structural problem with the encoded bytes returns them unchanged, so a
//! metadata issue can never fail a variant.
//!
//! JPEG marker layout relied on here:
//!
//! ```text
//! FF D8                      SOI (no length)
//! FF Ex LL LL <payload>      APPn, LL LL = big-endian length incl. itself
//! ...
//! FF DA                      SOS, entropy-coded data follows
//! ```

use tracing::debug;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// A complete `APP1` Exif segment, marker and length included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifSegment(Vec<u8>);

/// A marker segment located inside a JPEG buffer.
struct Segment {
    marker: u8,
    /// Offset of the `FF` byte.
    start: usize,
    /// Offset one past the end of the payload.
    end: usize,
}

impl Segment {
    fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start + 4..self.end]
    }
}

/// Walk the header segments of a JPEG, stopping at SOS.
///
/// Returns `None` if the buffer is not a JPEG or a segment length runs past
/// the end of the buffer.
fn header_segments(data: &[u8]) -> Option<Vec<Segment>> {
    if !data.starts_with(&SOI) {
        return None;
    }
    let mut segments = Vec::new();
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // Fill bytes before a marker
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS {
            return Some(segments);
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > data.len() {
            return None;
        }
        segments.push(Segment {
            marker,
            start: pos,
            end: pos + 2 + len,
        });
        pos += 2 + len;
    }
    None
}

impl ExifSegment {
    /// Extract the Exif segment from a JPEG, if it has one.
    pub fn from_jpeg(data: &[u8]) -> Option<Self> {
        header_segments(data)?
            .into_iter()
            .find(|s| s.marker == APP1 && s.payload(data).starts_with(EXIF_HEADER))
            .map(|s| Self(data[s.start..s.end].to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Splice this segment into `encoded`, right after SOI and any `APP0`
    /// (JFIF) segment, replacing an existing Exif segment.
    ///
    /// Returns `encoded` untouched if it cannot be parsed.
    pub fn transplant(&self, encoded: Vec<u8>) -> Vec<u8> {
        match self.try_transplant(&encoded) {
            Some(out) => out,
            None => {
                debug!("exif transplant skipped, encoded bytes not understood");
                encoded
            }
        }
    }

    fn try_transplant(&self, encoded: &[u8]) -> Option<Vec<u8>> {
        let segments = header_segments(encoded)?;
        let insert_at = segments
            .iter()
            .take_while(|s| s.marker == APP0)
            .last()
            .map_or(SOI.len(), |s| s.end);

        let mut out = Vec::with_capacity(encoded.len() + self.0.len());
        out.extend_from_slice(&encoded[..insert_at]);
        out.extend_from_slice(&self.0);

        let mut pos = insert_at;
        for seg in segments.iter().filter(|s| s.start >= insert_at) {
            if seg.marker == APP1 && seg.payload(encoded).starts_with(EXIF_HEADER) {
                out.extend_from_slice(&encoded[pos..seg.start]);
                pos = seg.end;
            }
        }
        out.extend_from_slice(&encoded[pos..]);
        Some(out)
    }
}
