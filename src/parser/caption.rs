use image::RgbImage;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use super::cropper::RegionCropper;
use super::region::Region;
use crate::services::TextRecognizer;
use crate::utils::text::normalize_whitespace;
use crate::utils::IngestResult;

/// 从插图前后相邻区块中识别图注
pub struct CaptionResolver {
    recognizer: Arc<dyn TextRecognizer>,
    cropper: RegionCropper,
    pattern: Regex,
}

impl CaptionResolver {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            recognizer,
            cropper: RegionCropper::new(),
            pattern: Regex::new(r"(Fig\.|Figure)\s+\d+").unwrap(),
        }
    }

    pub fn is_caption(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// 前驱匹配则取前驱文本；后继匹配则无条件覆盖。均不匹配返回空串。
    pub async fn resolve(
        &self,
        image: &RgbImage,
        predecessor: Option<&Region>,
        successor: Option<&Region>,
    ) -> IngestResult<String> {
        let mut caption = String::new();

        for neighbor in [predecessor, successor].into_iter().flatten() {
            let text = self.neighbor_text(image, neighbor).await?;
            if self.is_caption(&text) {
                debug!("相邻 {} 区块匹配图注: {}", neighbor.kind, text);
                caption = text;
            }
        }

        Ok(caption)
    }

    async fn neighbor_text(&self, image: &RgbImage, neighbor: &Region) -> IngestResult<String> {
        let crop = self.cropper.crop_uniform(image, neighbor)?;
        let raw = self.recognizer.recognize(&crop).await?;
        Ok(normalize_whitespace(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::region::{BoundingBox, RegionKind};
    use crate::services::testing::{paint, ColorRecognizer};

    fn setup(pred: &str, succ: &str) -> (CaptionResolver, RgbImage, Region, Region) {
        let mut image = RgbImage::new(400, 400);
        let above = Region::new(RegionKind::Text, BoundingBox::new(20.0, 20.0, 380.0, 80.0), "g");
        let below = Region::new(RegionKind::Text, BoundingBox::new(20.0, 300.0, 380.0, 360.0), "g");
        paint(&mut image, &above.bbox, 10);
        paint(&mut image, &below.bbox, 20);
        let recognizer = ColorRecognizer::new(&[(10, pred), (20, succ)]);
        (CaptionResolver::new(Arc::new(recognizer)), image, above, below)
    }

    #[tokio::test]
    async fn successor_overrides_predecessor_when_both_match() {
        let (resolver, image, above, below) = setup("Fig. 3 shows\nthe setup", "Figure 4 depicts  results");
        let caption = resolver.resolve(&image, Some(&above), Some(&below)).await.unwrap();
        assert_eq!(caption, "Figure 4 depicts results");
    }

    #[tokio::test]
    async fn predecessor_used_when_successor_does_not_match() {
        let (resolver, image, above, below) = setup("Figure 2. A diagram", "Body text continues.");
        let caption = resolver.resolve(&image, Some(&above), Some(&below)).await.unwrap();
        assert_eq!(caption, "Figure 2. A diagram");
    }

    #[tokio::test]
    async fn no_neighbors_or_no_match_gives_empty_caption() {
        let (resolver, image, above, _) = setup("Plain paragraph", "");
        assert_eq!(resolver.resolve(&image, None, None).await.unwrap(), "");
        assert_eq!(resolver.resolve(&image, Some(&above), None).await.unwrap(), "");
    }

    #[test]
    fn pattern_requires_whitespace_and_number() {
        let (resolver, ..) = setup("", "");
        assert!(resolver.is_caption("see Fig. 12 for details"));
        assert!(resolver.is_caption("Figure\t7"));
        assert!(!resolver.is_caption("Figure A"));
        assert!(!resolver.is_caption("Fig.3"));
        assert!(!resolver.is_caption("figure 3"));
    }
}
