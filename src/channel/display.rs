//! DISPLAY channel: surface lifecycle and the two drawing primitives this
//! core actually renders — solid fills and uncompressed bitmap copies
//! (spec.md §4.4). Offset-based wire structs are parsed into an owned AST
//! of slice views rather than mutated in place (spec.md §9).

use crate::error::{Result, SpiceError};
use crate::wire::caps::CapSet;
use crate::wire::{
    bitmap_flags, bitmap_format, brush_type, display_msgc, image_type, preferred_compression,
    surface_format,
};

pub struct DisplayState {
    pub prefers_compression: bool,
}

impl DisplayState {
    pub fn new() -> Self {
        Self {
            prefers_compression: false,
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

/// `setCaps()`: notes whether the server advertised preferred-compression
/// so `connect_packet` knows to ask for it to be turned off.
pub fn set_caps(state: &mut DisplayState, channel_caps: &[u32]) {
    let caps = CapSet::from_words(channel_caps.to_vec());
    state.prefers_compression = caps.has(crate::wire::caps::display::PREF_COMPRESSION);
}

/// Connect packet emitted right after the link handshake: a display-init
/// body, followed (if negotiated) by a preferred-compression request of
/// OFF, since this core never decodes compressed images (spec.md §4.4).
pub fn connect_packet(state: &DisplayState) -> (u16, Vec<u8>) {
    if state.prefers_compression {
        (
            display_msgc::PREFERRED_COMPRESSION,
            vec![preferred_compression::OFF],
        )
    } else {
        (display_msgc::INIT, Vec::new())
    }
}

/// Public surface-format enum (spec.md §6: "1_A, 8_A, 16_555, 32_xRGB,
/// 16_565, 32_ARGB").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySurfaceFormat {
    Fmt1A,
    Fmt8A,
    Fmt16_555,
    Fmt32Xrgb,
    Fmt16_565,
    Fmt32Argb,
}

impl DisplaySurfaceFormat {
    fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            surface_format::FMT_1_A => DisplaySurfaceFormat::Fmt1A,
            surface_format::FMT_8_A => DisplaySurfaceFormat::Fmt8A,
            surface_format::FMT_16_555 => DisplaySurfaceFormat::Fmt16_555,
            surface_format::FMT_32_XRGB => DisplaySurfaceFormat::Fmt32Xrgb,
            surface_format::FMT_16_565 => DisplaySurfaceFormat::Fmt16_565,
            surface_format::FMT_32_ARGB => DisplaySurfaceFormat::Fmt32Argb,
            other => {
                return Err(SpiceError::Protocol(format!(
                    "unsupported SURFACE_CREATE format {other}"
                )))
            }
        })
    }
}

pub struct SurfaceCreate {
    pub surface_id: u32,
    pub format: DisplaySurfaceFormat,
    pub width: u32,
    pub height: u32,
}

pub fn parse_surface_create(payload: &[u8]) -> Result<SurfaceCreate> {
    if payload.len() < 16 {
        return Err(SpiceError::Protocol("short SURFACE_CREATE message".into()));
    }
    let surface_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let width = u32::from_le_bytes(payload[4..8].try_into().unwrap());
    let height = u32::from_le_bytes(payload[8..12].try_into().unwrap());
    let format = DisplaySurfaceFormat::from_wire(u32::from_le_bytes(
        payload[12..16].try_into().unwrap(),
    ))?;
    Ok(SurfaceCreate {
        surface_id,
        format,
        width,
        height,
    })
}

pub fn parse_surface_destroy(payload: &[u8]) -> Result<u32> {
    payload
        .get(0..4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| SpiceError::Protocol("short SURFACE_DESTROY message".into()))
}

/// A parsed `SpiceRect`: left/top/right/bottom, as the wire sends it.
#[derive(Debug, Clone, Copy)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(SpiceError::Protocol("short rect".into()));
        }
        Ok(Self {
            left: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            top: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            right: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            bottom: i32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// `SpiceMsgDisplayBase`: surface id, bounding box, and an optional clip
/// (spec.md §4.4: "zero as absent"). Every drawing op begins with this.
struct DisplayBase {
    surface_id: u32,
    box_: Rect,
}

/// `surface_id(4) + box(16) + clip(4 type + 4 count, only NONE/type=0
/// honoured since this core draws unclipped)`.
const DISPLAY_BASE_SIZE: usize = 4 + 16 + 4 + 4;

fn parse_base(payload: &[u8]) -> Result<(DisplayBase, &[u8])> {
    if payload.len() < DISPLAY_BASE_SIZE {
        return Err(SpiceError::Protocol("short display-base header".into()));
    }
    let surface_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let box_ = Rect::parse(&payload[4..20])?;
    Ok((DisplayBase { surface_id, box_ }, &payload[DISPLAY_BASE_SIZE..]))
}

/// A solid fill (spec.md §4.4 `DRAW_FILL`): surface, box, and an RGBA
/// color drawn only when the brush is solid.
pub struct DrawFill {
    pub surface_id: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: [u8; 4],
}

/// Parses `DRAW_FILL`. Non-solid brushes (none/pattern) are logged by the
/// caller and produce `Ok(None)` — "log and succeed without drawing"
/// (spec.md §4.4).
pub fn parse_draw_fill(payload: &[u8]) -> Result<Option<DrawFill>> {
    let (base, rest) = parse_base(payload)?;
    // Brush: rop_descriptor(2, ignored) + brush{type:u8, then payload by type}.
    if rest.len() < 3 {
        return Err(SpiceError::Protocol("short DRAW_FILL brush".into()));
    }
    let brush = &rest[2..];
    let kind = brush[0];
    if kind != brush_type::SOLID {
        return Ok(None);
    }
    if brush.len() < 5 {
        return Err(SpiceError::Protocol("short solid-brush color".into()));
    }
    let color = [brush[1], brush[2], brush[3], brush[4]];
    Ok(Some(DrawFill {
        surface_id: base.surface_id,
        x: base.box_.left,
        y: base.box_.top,
        width: base.box_.width(),
        height: base.box_.height(),
        color,
    }))
}

/// Resolved, owned bitmap ready for the `draw_bitmap` callback.
pub struct DrawBitmapResolved {
    pub surface_id: u32,
    pub format: PixelFormat,
    pub top_down: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: Vec<u8>,
}

/// Pixel format at the callback boundary: always RGBA
/// (spec.md §6: "Bitmap format at the callback is RGBA"). A unit variant
/// rather than an enum since no other format ever reaches the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
}

/// Parses `DRAW_COPY`. Compressed image types are logged by the caller
/// and produce `Ok(None)` (spec.md §4.4: "log a warning and succeed
/// without drawing").
pub fn parse_draw_copy(payload: &[u8]) -> Result<Option<DrawBitmapResolved>> {
    let (base, rest) = parse_base(payload)?;
    // SpiceCopy: src_area(16) + rop_descriptor(2) + scale_mode(1) +
    // src_bitmap: an offset (u32) into `payload` pointing at the image
    // descriptor.
    if rest.len() < 16 + 2 + 1 + 4 {
        return Err(SpiceError::Protocol("short DRAW_COPY body".into()));
    }
    let src_bitmap_off = u32::from_le_bytes(rest[19..23].try_into().unwrap()) as usize;
    if src_bitmap_off == 0 {
        return Ok(None);
    }
    let image = payload
        .get(src_bitmap_off..)
        .ok_or_else(|| SpiceError::Protocol("DRAW_COPY src_bitmap offset out of range".into()))?;
    parse_image(image).map(|resolved| {
        resolved.map(|mut r| {
            r.surface_id = base.surface_id;
            r.x = base.box_.left;
            r.y = base.box_.top;
            r
        })
    })
}

/// `SpiceImage`: a 16-byte descriptor (uid + type + flags + width/height,
/// treated here only far enough to branch on `type`) followed by a
/// type-specific body; only `IMAGE_TYPE_BITMAP` is honoured.
fn parse_image(image: &[u8]) -> Result<Option<DrawBitmapResolved>> {
    // descriptor: id(8) + type(1) + flags(1) + width(4) + height(4) = 18.
    if image.len() < 18 {
        return Err(SpiceError::Protocol("short image descriptor".into()));
    }
    let image_type = image[8];
    if image_type != image_type::BITMAP {
        return Ok(None);
    }
    let body = &image[18..];
    // SpiceBitmap: format(1) + flags(1) + x(4) + y(4) + stride(4) +
    // palette_offset(4, 0=absent) + data...
    if body.len() < 18 {
        return Err(SpiceError::Protocol("short bitmap header".into()));
    }
    let format = body[0];
    let flags = body[1];
    let width = u32::from_le_bytes(body[2..6].try_into().unwrap());
    let height = u32::from_le_bytes(body[6..10].try_into().unwrap());
    let stride = u32::from_le_bytes(body[10..14].try_into().unwrap());
    let palette_offset = u32::from_le_bytes(body[14..18].try_into().unwrap());

    let data_start = 18 + if palette_offset != 0 {
        palette_bytes(format)
    } else {
        0
    };
    let raw = body
        .get(data_start..)
        .ok_or_else(|| SpiceError::Protocol("bitmap data runs past image bounds".into()))?;

    let data = convert_to_rgba(format, raw, width, height, stride)?;
    Ok(Some(DrawBitmapResolved {
        surface_id: 0,
        format: PixelFormat::Rgba,
        top_down: flags & bitmap_flags::TOP_DOWN != 0,
        x: 0,
        y: 0,
        width,
        height,
        stride: width * 4,
        data,
    }))
}

fn palette_bytes(format: u8) -> usize {
    match format {
        bitmap_format::PAL_1BE => 2 * 4,
        bitmap_format::PAL_4BE => 16 * 4,
        bitmap_format::PAL_8 => 256 * 4,
        _ => 0,
    }
}

/// Converts a supported uncompressed bitmap format to tightly packed RGBA.
/// Palette formats are out of scope for this core beyond skipping their
/// bytes (spec.md §1: "anything else is logged and dropped" — palette
/// expansion is left unimplemented and surfaces as a protocol error).
fn convert_to_rgba(format: u8, raw: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>> {
    let width = width as usize;
    let height = height as usize;
    let stride = stride as usize;
    let mut out = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let row_start = row * stride;
        let row_bytes = raw
            .get(row_start..)
            .ok_or_else(|| SpiceError::Protocol("bitmap row runs past data".into()))?;
        for col in 0..width {
            let px = match format {
                bitmap_format::RGB32 => {
                    let o = col * 4;
                    [row_bytes[o], row_bytes[o + 1], row_bytes[o + 2], 0xff]
                }
                bitmap_format::RGBA => {
                    let o = col * 4;
                    [row_bytes[o], row_bytes[o + 1], row_bytes[o + 2], row_bytes[o + 3]]
                }
                bitmap_format::RGB24 => {
                    let o = col * 3;
                    [row_bytes[o], row_bytes[o + 1], row_bytes[o + 2], 0xff]
                }
                bitmap_format::RGB16_565 => {
                    let o = col * 2;
                    let v = u16::from_le_bytes([row_bytes[o], row_bytes[o + 1]]);
                    let r = ((v >> 11) & 0x1f) as u8;
                    let g = ((v >> 5) & 0x3f) as u8;
                    let b = (v & 0x1f) as u8;
                    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xff]
                }
                bitmap_format::RGB16_555 => {
                    let o = col * 2;
                    let v = u16::from_le_bytes([row_bytes[o], row_bytes[o + 1]]);
                    let r = ((v >> 10) & 0x1f) as u8;
                    let g = ((v >> 5) & 0x1f) as u8;
                    let b = (v & 0x1f) as u8;
                    [(r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2), 0xff]
                }
                other => {
                    return Err(SpiceError::Protocol(format!(
                        "unsupported bitmap format {other}"
                    )))
                }
            };
            out.extend_from_slice(&px);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_bytes(surface_id: u32, left: i32, top: i32, right: i32, bottom: i32) -> Vec<u8> {
        let mut v = surface_id.to_le_bytes().to_vec();
        v.extend_from_slice(&left.to_le_bytes());
        v.extend_from_slice(&top.to_le_bytes());
        v.extend_from_slice(&right.to_le_bytes());
        v.extend_from_slice(&bottom.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes()); // clip type + pad
        v.extend_from_slice(&0u32.to_le_bytes()); // clip count
        v
    }

    #[test]
    fn surface_create_rejects_unknown_format() {
        let mut payload = 1u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&640u32.to_le_bytes());
        payload.extend_from_slice(&480u32.to_le_bytes());
        payload.extend_from_slice(&0xDEADu32.to_le_bytes());
        assert!(parse_surface_create(&payload).is_err());
    }

    #[test]
    fn surface_create_parses_known_format() {
        let mut payload = 1u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&640u32.to_le_bytes());
        payload.extend_from_slice(&480u32.to_le_bytes());
        payload.extend_from_slice(&surface_format::FMT_32_ARGB.to_le_bytes());
        let create = parse_surface_create(&payload).unwrap();
        assert_eq!(create.surface_id, 1);
        assert_eq!(create.format, DisplaySurfaceFormat::Fmt32Argb);
    }

    #[test]
    fn draw_fill_with_solid_brush_gives_color() {
        let mut payload = base_bytes(3, 10, 20, 30, 50);
        payload.extend_from_slice(&[0u8, 0u8]); // rop descriptor
        payload.push(brush_type::SOLID);
        payload.extend_from_slice(&[1, 2, 3, 4]); // color bytes

        let fill = parse_draw_fill(&payload).unwrap().unwrap();
        assert_eq!(fill.surface_id, 3);
        assert_eq!(fill.x, 10);
        assert_eq!(fill.y, 20);
        assert_eq!(fill.width, 20);
        assert_eq!(fill.height, 30);
        assert_eq!(fill.color, [1, 2, 3, 4]);
    }

    #[test]
    fn draw_fill_with_non_solid_brush_is_ignored() {
        let mut payload = base_bytes(3, 0, 0, 1, 1);
        payload.extend_from_slice(&[0u8, 0u8]);
        payload.push(brush_type::NONE);
        assert!(parse_draw_fill(&payload).unwrap().is_none());
    }

    #[test]
    fn draw_copy_with_zero_offset_is_absent() {
        let mut payload = base_bytes(0, 0, 0, 1, 1);
        payload.extend_from_slice(&[0u8; 16]); // src_area
        payload.extend_from_slice(&[0u8; 2]); // rop
        payload.push(0); // scale_mode
        payload.extend_from_slice(&0u32.to_le_bytes()); // src_bitmap offset = 0
        assert!(parse_draw_copy(&payload).unwrap().is_none());
    }

    #[test]
    fn rgb32_bitmap_converts_to_opaque_rgba() {
        let raw = [10u8, 20, 30, 0, 40, 50, 60, 0];
        let out = convert_to_rgba(bitmap_format::RGB32, &raw, 2, 1, 8).unwrap();
        assert_eq!(out, vec![10, 20, 30, 0xff, 40, 50, 60, 0xff]);
    }
}
