//! C6: braille window state (spec.md §3, §4.9 WRITE handling).
//!
//! The window is the core's cached image of one display: a row of
//! character codes plus per-cell AND/OR attribute masks, and an
//! optional cursor position. Rendering folds a cell down to raw dots
//! with `(textTable(text[i]) AND andAttr[i]) OR orAttr[i]`, then the
//! cursor cell gets ORed with all dots set.

use crate::error::{Error, ErrorCode};

/// All dots set; used to overlay the cursor cell (matches the
/// reference cursor representation, a solid block).
pub const CURSOR_DOTS: u8 = 0xFF;

const BLANK_CHAR: u8 = b' ';
const DEFAULT_AND: u8 = 0xFF;
const DEFAULT_OR: u8 = 0x00;

#[derive(Clone, Debug)]
pub struct BrailleWindow {
    size: usize,
    text: Vec<u8>,
    and_attr: Vec<u8>,
    or_attr: Vec<u8>,
    cursor: Option<usize>,
}

impl BrailleWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            text: vec![BLANK_CHAR; size],
            and_attr: vec![DEFAULT_AND; size],
            or_attr: vec![DEFAULT_OR; size],
            cursor: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Renders the window to raw display dots.
    pub fn render(&self, convert: impl Fn(u8) -> u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for i in 0..self.size {
            let mut dots = convert(self.text[i]) & self.and_attr[i] | self.or_attr[i];
            if self.cursor == Some(i) {
                dots |= CURSOR_DOTS;
            }
            out.push(dots);
        }
        out
    }

    /// Applies a WRITE packet's region to this window (spec.md §4.9).
    ///
    /// `begin == 0 && size == 0` means "the whole display" (resolved
    /// open question). A negative `fill` size (`size` omitted, `-n`
    /// convention from the wire encoding already unpacked by the
    /// caller into `None`) fills to the end of the display from
    /// `begin`. Masks/text shorter than the resolved region length are
    /// applied only over their own length; the remaining region cells
    /// are left untouched, never zero-filled.
    pub fn apply_write(&mut self, write: WriteRegion) -> crate::error::Result<()> {
        let (start, len) = self.resolve_region(write.begin, write.size)?;
        if let Some(text) = &write.text {
            let n = text.len().min(len);
            self.text[start..start + n].copy_from_slice(&text[..n]);
        }
        if let Some(mask) = &write.and_mask {
            let n = mask.len().min(len);
            self.and_attr[start..start + n].copy_from_slice(&mask[..n]);
        }
        if let Some(mask) = &write.or_mask {
            let n = mask.len().min(len);
            self.or_attr[start..start + n].copy_from_slice(&mask[..n]);
        }
        match write.cursor {
            Some(CursorUpdate::Set(pos)) => {
                if pos >= self.size {
                    return Err(Error::from(ErrorCode::InvalidParameter));
                }
                self.cursor = Some(pos);
            }
            Some(CursorUpdate::Clear) => self.cursor = None,
            None => {}
        }
        Ok(())
    }

    fn resolve_region(&self, begin: usize, size: Option<usize>) -> crate::error::Result<(usize, usize)> {
        if begin == 0 && size.is_none() {
            return Ok((0, self.size));
        }
        if begin == 0 || begin > self.size {
            return Err(Error::from(ErrorCode::InvalidParameter));
        }
        let start = begin - 1;
        let len = match size {
            Some(n) => n,
            None => self.size - start,
        };
        if start + len > self.size {
            return Err(Error::from(ErrorCode::InvalidParameter));
        }
        Ok((start, len))
    }
}

#[derive(Clone, Debug, Default)]
pub struct WriteRegion {
    /// 1-based first cell of the region; `0` combined with `size: None`
    /// means "whole display".
    pub begin: usize,
    /// Region length; `None` means "fill to the end of the display".
    pub size: Option<usize>,
    pub text: Option<Vec<u8>>,
    pub and_mask: Option<Vec<u8>>,
    pub or_mask: Option<Vec<u8>>,
    pub cursor: Option<CursorUpdate>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorUpdate {
    Set(usize),
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(c: u8) -> u8 {
        c
    }

    #[test]
    fn new_window_is_blank() {
        let window = BrailleWindow::new(4);
        assert_eq!(window.render(identity), vec![BLANK_CHAR; 4]);
    }

    #[test]
    fn zero_zero_region_covers_whole_display() {
        let mut window = BrailleWindow::new(4);
        window
            .apply_write(WriteRegion {
                begin: 0,
                size: None,
                text: Some(vec![1, 2, 3, 4]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(window.render(identity), vec![1, 2, 3, 4]);
    }

    #[test]
    fn short_mask_only_touches_its_own_length() {
        let mut window = BrailleWindow::new(4);
        window
            .apply_write(WriteRegion {
                begin: 1,
                size: Some(4),
                and_mask: Some(vec![0x0F, 0x0F]),
                ..Default::default()
            })
            .unwrap();
        let mut expected = vec![DEFAULT_AND; 4];
        expected[0] = 0x0F;
        expected[1] = 0x0F;
        assert_eq!(window.and_attr, expected);
    }

    #[test]
    fn fill_region_runs_to_end_of_display() {
        let mut window = BrailleWindow::new(5);
        window
            .apply_write(WriteRegion {
                begin: 3,
                size: None,
                text: Some(vec![9, 9, 9]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(window.render(identity), vec![BLANK_CHAR, BLANK_CHAR, 9, 9, 9]);
    }

    #[test]
    fn cursor_overlay_forces_all_dots() {
        let mut window = BrailleWindow::new(3);
        window
            .apply_write(WriteRegion {
                cursor: Some(CursorUpdate::Set(1)),
                ..Default::default()
            })
            .unwrap();
        let rendered = window.render(|_| 0x00);
        assert_eq!(rendered[1], CURSOR_DOTS);
        assert_eq!(rendered[0], 0x00);
    }

    #[test]
    fn region_past_display_is_rejected() {
        let mut window = BrailleWindow::new(4);
        let err = window
            .apply_write(WriteRegion {
                begin: 3,
                size: Some(4),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::InvalidParameter);
    }
}
