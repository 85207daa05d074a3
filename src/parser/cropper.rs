use image::{imageops, RgbImage};

use super::region::{BoundingBox, Region, RegionKind};
use crate::utils::{IngestError, IngestResult};

/// 文本、标题、列表、插图及相邻区块的统一外扩像素
pub const UNIFORM_MARGIN: f32 = 5.0;
/// 表格上方外扩，用于带上表格上方的标题
pub const TABLE_TOP_MARGIN: f32 = 70.0;
pub const TABLE_RIGHT_MARGIN: f32 = 20.0;
pub const TABLE_BOTTOM_MARGIN: f32 = 20.0;

/// 外扩策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Padding {
    Uniform(f32),
    /// 左边界直接延伸到图像左缘
    Table { top: f32, right: f32, bottom: f32 },
}

impl Padding {
    pub fn for_kind(kind: RegionKind) -> Self {
        match kind {
            RegionKind::Table => Padding::Table {
                top: TABLE_TOP_MARGIN,
                right: TABLE_RIGHT_MARGIN,
                bottom: TABLE_BOTTOM_MARGIN,
            },
            RegionKind::Figure | RegionKind::Text | RegionKind::Title | RegionKind::List => {
                Padding::Uniform(UNIFORM_MARGIN)
            }
        }
    }
}

/// 裁剪窗口（整数像素，已限制在图像范围内）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RegionCropper;

impl RegionCropper {
    pub fn new() -> Self {
        Self
    }

    /// 按区块类型的外扩策略计算裁剪窗口
    pub fn window(
        &self,
        bbox: &BoundingBox,
        padding: Padding,
        image_width: u32,
        image_height: u32,
    ) -> IngestResult<CropWindow> {
        let (w, h) = (image_width as f32, image_height as f32);
        let (x1, y1, x2, y2) = match padding {
            Padding::Uniform(m) => (bbox.x1 - m, bbox.y1 - m, bbox.x2 + m, bbox.y2 + m),
            Padding::Table { top, right, bottom } => {
                (0.0, bbox.y1 - top, bbox.x2 + right, bbox.y2 + bottom)
            }
        };

        // Truncate like the detector's integer pixel grid does.
        let x1 = x1.max(0.0).min(w) as u32;
        let y1 = y1.max(0.0).min(h) as u32;
        let x2 = x2.min(w).max(0.0) as u32;
        let y2 = y2.min(h).max(0.0) as u32;

        if x2 <= x1 || y2 <= y1 {
            return Err(IngestError::CropError(format!(
                "无效裁剪区域: ({x1}, {y1}) - ({x2}, {y2})，图像 {image_width}x{image_height}"
            )));
        }

        Ok(CropWindow {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }

    pub fn crop_with(
        &self,
        image: &RgbImage,
        bbox: &BoundingBox,
        padding: Padding,
    ) -> IngestResult<RgbImage> {
        let win = self.window(bbox, padding, image.width(), image.height())?;
        Ok(imageops::crop_imm(image, win.x, win.y, win.width, win.height).to_image())
    }

    /// 按区块自身类型裁剪
    pub fn crop(&self, image: &RgbImage, region: &Region) -> IngestResult<RgbImage> {
        self.crop_with(image, &region.bbox, Padding::for_kind(region.kind))
    }

    /// 以统一 5 像素外扩裁剪（用于插图标题的相邻区块）
    pub fn crop_uniform(&self, image: &RgbImage, region: &Region) -> IngestResult<RgbImage> {
        self.crop_with(image, &region.bbox, Padding::Uniform(UNIFORM_MARGIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_padding_expands_and_clamps() {
        let cropper = RegionCropper::new();
        let bbox = BoundingBox::new(2.0, 50.0, 98.0, 60.0);
        let win = cropper
            .window(&bbox, Padding::Uniform(UNIFORM_MARGIN), 100, 200)
            .unwrap();
        assert_eq!(
            win,
            CropWindow {
                x: 0,
                y: 45,
                width: 100,
                height: 20
            }
        );
    }

    #[test]
    fn table_padding_reaches_left_edge_and_captures_caption_above() {
        let cropper = RegionCropper::new();
        let bbox = BoundingBox::new(300.0, 500.0, 800.0, 900.0);
        let win = cropper
            .window(&bbox, Padding::for_kind(RegionKind::Table), 1000, 1000)
            .unwrap();
        assert_eq!(
            win,
            CropWindow {
                x: 0,
                y: 430,
                width: 820,
                height: 490
            }
        );
    }

    #[test]
    fn table_padding_clamps_at_image_bounds() {
        let cropper = RegionCropper::new();
        let bbox = BoundingBox::new(300.0, 40.0, 990.0, 995.0);
        let win = cropper
            .window(&bbox, Padding::for_kind(RegionKind::Table), 1000, 1000)
            .unwrap();
        assert_eq!((win.x, win.y), (0, 0));
        assert_eq!((win.width, win.height), (1000, 1000));
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let cropper = RegionCropper::new();
        let bbox = BoundingBox::new(500.0, 500.0, 400.0, 400.0);
        let err = cropper.window(&bbox, Padding::Uniform(0.0), 1000, 1000);
        assert!(matches!(err, Err(IngestError::CropError(_))));
    }

    #[test]
    fn crop_returns_sub_image_of_window_size() {
        let image = RgbImage::new(120, 80);
        let region = Region::new(
            RegionKind::Text,
            BoundingBox::new(10.0, 10.0, 30.0, 20.0),
            "test",
        );
        let cropped = RegionCropper::new().crop(&image, &region).unwrap();
        assert_eq!(cropped.dimensions(), (30, 20));
    }
}
