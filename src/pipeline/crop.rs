//! Crop extraction: turn a prediction set into sub-images of the source.

use crate::pipeline::predict::{BoundingBox, Prediction};
use image::DynamicImage;
use tracing::debug;

/// Crop every predicted region out of `image`, in prediction order.
///
/// Boxes are clamped to the image. A box with no area left after clamping
/// produces no crop, so the result may be shorter than `prediction.regions`.
/// Zero regions is a normal outcome and yields an empty vector.
pub fn crop_regions(prediction: &Prediction, image: &DynamicImage) -> Vec<DynamicImage> {
    prediction
        .regions
        .iter()
        .filter_map(|region| {
            let crop = clamp_box(&region.bbox, image.width(), image.height())
                .map(|(x, y, w, h)| image.crop_imm(x, y, w, h));
            if crop.is_none() {
                debug!("Region {} has an empty box, skipping", region.id);
            }
            crop
        })
        .collect()
}

/// Clamp `bbox` to a `width` × `height` image as `(x, y, w, h)`.
fn clamp_box(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clamp = |v: i64, max: u32| v.clamp(0, max as i64) as u32;
    let x0 = clamp(bbox.xmin, width);
    let y0 = clamp(bbox.ymin, height);
    let x1 = clamp(bbox.xmax, width);
    let y1 = clamp(bbox.ymax, height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::predict::Region;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn region(id: &str, xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Region {
        Region {
            id: id.into(),
            label: "figure".into(),
            score: 0.9,
            bbox: BoundingBox {
                xmin,
                ymin,
                xmax,
                ymax,
            },
        }
    }

    /// 100x50 image whose red channel encodes x and green channel encodes y.
    fn gradient() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(100, 50, |x, y| {
            Rgba([x as u8, y as u8, 0, 255])
        }))
    }

    #[test]
    fn crops_follow_prediction_order_and_geometry() {
        let img = gradient();
        let p = Prediction {
            regions: vec![region("a", 10, 5, 30, 25), region("b", 60, 0, 100, 50)],
        };
        let crops = crop_regions(&p, &img);
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].dimensions(), (20, 20));
        assert_eq!(crops[0].get_pixel(0, 0), Rgba([10, 5, 0, 255]));
        assert_eq!(crops[1].dimensions(), (40, 50));
        assert_eq!(crops[1].get_pixel(0, 0), Rgba([60, 0, 0, 255]));
    }

    #[test]
    fn zero_regions_yield_no_crops() {
        assert!(crop_regions(&Prediction::default(), &gradient()).is_empty());
    }

    #[test]
    fn boxes_are_clamped_to_the_image() {
        let p = Prediction {
            regions: vec![region("edge", -10, -10, 500, 20)],
        };
        let crops = crop_regions(&p, &gradient());
        assert_eq!(crops[0].dimensions(), (100, 20));
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let p = Prediction {
            regions: vec![
                region("flat", 10, 10, 40, 10),
                region("outside", 200, 200, 300, 300),
                region("ok", 0, 0, 1, 1),
            ],
        };
        assert_eq!(crop_regions(&p, &gradient()).len(), 1);
    }
}
