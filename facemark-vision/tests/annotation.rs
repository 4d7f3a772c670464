use anyhow::Result;
use facemark_vision::{annotate, NormalizedBox, PixelRect, VisionError};
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};

const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// Deterministic, non-uniform test picture.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 200) as u8])
    })
}

#[test]
fn test_empty_boxes_leave_pixels_untouched() -> Result<()> {
    let src = DynamicImage::ImageRgb8(gradient(64, 48));
    let out = annotate(&src, &[])?;
    assert_eq!(out.as_rgb8(), src.as_rgb8());
    Ok(())
}

#[test]
fn test_deep_color_kept_without_boxes() -> Result<()> {
    let src = DynamicImage::ImageRgb16(ImageBuffer::from_pixel(4, 4, Rgb([1000u16, 2000, 3001])));
    let out = annotate(&src, &[])?;
    assert_eq!(out, src);

    let src = DynamicImage::ImageRgba32F(ImageBuffer::from_pixel(3, 5, Rgba([0.1f32, 0.2, 0.3, 0.4])));
    assert_eq!(annotate(&src, &[])?, src);
    Ok(())
}

#[test]
fn test_deep_color_outline_at_full_intensity() -> Result<()> {
    let src = DynamicImage::ImageRgb16(ImageBuffer::from_pixel(10, 10, Rgb([7u16, 7, 7])));
    let out = annotate(&src, &[NormalizedBox::new(0.0, 0.0, 1.0, 1.0)])?;
    let out = out.as_rgb16().expect("rgb16 stays rgb16");
    assert_eq!(*out.get_pixel(0, 0), Rgb([u16::MAX, u16::MAX, 0]));
    assert_eq!(*out.get_pixel(5, 5), Rgb([7, 7, 7]));
    Ok(())
}

#[test]
fn test_dimensions_preserved() -> Result<()> {
    let src = DynamicImage::ImageRgb8(gradient(100, 200));
    let boxes = [
        NormalizedBox::new(0.25, 0.5, 0.1, 0.1),
        NormalizedBox::new(0.0, 0.0, 1.0, 1.0),
        NormalizedBox::new(0.9, 0.9, 0.5, 0.5),
    ];
    let out = annotate(&src, &boxes)?;
    assert_eq!(out.dimensions(), (100, 200));
    Ok(())
}

#[test]
fn test_outline_drawn_at_flipped_position() -> Result<()> {
    let src = DynamicImage::ImageRgb8(RgbImage::new(100, 200));
    let out = annotate(&src, &[NormalizedBox::new(0.25, 0.5, 0.1, 0.1)])?;
    let out = out.as_rgb8().expect("rgb stays rgb");

    // PixelRect {25, 80, 10, 20}: corners at (25,80) and (34,99)
    for (x, y) in [(25, 80), (34, 80), (25, 99), (34, 99), (30, 80), (25, 90)] {
        assert_eq!(*out.get_pixel(x, y), YELLOW, "outline pixel ({}, {})", x, y);
    }
    // interior and outside untouched
    for (x, y) in [(30, 90), (24, 80), (25, 79), (35, 99), (25, 100)] {
        assert_eq!(*out.get_pixel(x, y), Rgb([0, 0, 0]), "pixel ({}, {})", x, y);
    }
    Ok(())
}

#[test]
fn test_only_outline_pixels_change() -> Result<()> {
    let src = gradient(80, 60);
    let b = NormalizedBox::new(0.2, 0.3, 0.5, 0.4);
    let out = annotate(&DynamicImage::ImageRgb8(src.clone()), &[b])?;
    let out = out.as_rgb8().expect("rgb stays rgb");

    let px = PixelRect::from_normalized(&b, 80, 60);
    let (x0, y0) = (px.x.round() as u32, px.y.round() as u32);
    let x1 = (px.x + px.width).round() as u32 - 1;
    let y1 = (px.y + px.height).round() as u32 - 1;

    for (x, y, p) in out.enumerate_pixels() {
        let on_vertical = (x == x0 || x == x1) && (y0..=y1).contains(&y);
        let on_horizontal = (y == y0 || y == y1) && (x0..=x1).contains(&x);
        let on_outline = on_vertical || on_horizontal;
        if on_outline {
            assert_eq!(*p, YELLOW);
        } else {
            assert_eq!(p, src.get_pixel(x, y));
        }
    }
    Ok(())
}

#[test]
fn test_negative_x_is_clamped_not_rejected() -> Result<()> {
    let b = NormalizedBox::new(-0.05, 0.2, 0.3, 0.3);
    let px = PixelRect::from_normalized(&b, 200, 100);
    assert_eq!(px.x, 0.0);
    assert!((px.width - 60.0).abs() < 1e-4);

    let out = annotate(&DynamicImage::ImageRgb8(RgbImage::new(200, 100)), &[b])?;
    assert_eq!(*out.as_rgb8().unwrap().get_pixel(0, 60), YELLOW);
    Ok(())
}

#[test]
fn test_input_not_mutated_and_alpha_kept() -> Result<()> {
    let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 128])));
    let before = src.clone();
    let out = annotate(&src, &[NormalizedBox::new(0.0, 0.0, 1.0, 1.0)])?;
    assert_eq!(src.as_rgba8(), before.as_rgba8());

    let out = out.as_rgba8().expect("rgba stays rgba");
    assert_eq!(*out.get_pixel(0, 0), Rgba([255, 255, 0, 255]));
    assert_eq!(*out.get_pixel(5, 5), Rgba([1, 2, 3, 128]));
    Ok(())
}

#[test]
fn test_zero_size_is_rendering_failure() {
    let src = DynamicImage::ImageRgba8(RgbaImage::new(0, 0));
    let err = annotate(&src, &[NormalizedBox::new(0.1, 0.1, 0.2, 0.2)]).unwrap_err();
    assert!(matches!(err, VisionError::RenderingFailure(_)));
    assert!(err.is_recoverable());
}
