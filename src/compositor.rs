use crate::error::SegmentationError;
use crate::segmentation::{Matte, Preprocessor, SegmentationModel};
use image::imageops::{self, GaussianBlurParameters};
use image::RgbImage;
use std::path::Path;

/// Confidence above which a pixel is kept as foreground. Strictly greater:
/// a pixel at exactly this value goes to the background.
pub const FOREGROUND_THRESHOLD: f32 = 0.1;

/// Kernel size of the synthesized background blur; sigma follows from it
pub const BACKGROUND_KERNEL: f32 = 55.0;

enum Substitute {
    /// Blur the live frame every call
    Blur,
    /// Image loaded but not yet fitted to the output geometry
    Loaded(RgbImage),
    /// Image scaled and cropped to exactly the output geometry
    Fitted(RgbImage),
}

/// Replaces everything behind the subject with a blurred copy of the frame or
/// a fixed still image.
pub struct Compositor {
    model: Box<dyn SegmentationModel>,
    substitute: Substitute,
    show_matte: bool,
    fallback_noticed: bool,
}

impl Compositor {
    pub fn new(model: Box<dyn SegmentationModel>) -> Self {
        Self {
            model,
            substitute: Substitute::Blur,
            show_matte: false,
            fallback_noticed: false,
        }
    }

    /// Emit the confidence grid as grayscale instead of the composite
    pub fn with_matte_view(mut self, show_matte: bool) -> Self {
        self.show_matte = show_matte;
        self
    }

    /// Load the still background from `path`.
    ///
    /// A missing or unreadable file is not fatal: the blur background stays in
    /// effect and `false` is returned.
    pub fn load_background(&mut self, path: &Path) -> bool {
        if !path.exists() {
            tracing::warn!(
                "Background image set, but file does not exist: {}",
                path.display()
            );
            return false;
        }

        match image::open(path) {
            Ok(image) => {
                tracing::info!("Loaded background image {}", path.display());
                self.set_background(image.to_rgb8())
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to decode background image {}: {}",
                    path.display(),
                    err
                );
                false
            }
        }
    }

    /// Use `image` as the still background. An empty image is rejected and the
    /// blurred background stays in effect.
    pub fn set_background(&mut self, image: RgbImage) -> bool {
        if image.width() == 0 || image.height() == 0 {
            tracing::warn!(
                "Background image is {}x{}, keeping blurred background",
                image.width(),
                image.height()
            );
            return false;
        }

        self.substitute = Substitute::Loaded(image);
        self.fallback_noticed = false;
        true
    }

    /// Fit the loaded background to cover `width` x `height`
    pub fn set_background_size(&mut self, width: u32, height: u32) {
        let image = match &self.substitute {
            Substitute::Loaded(image) | Substitute::Fitted(image) => image,
            Substitute::Blur => {
                tracing::warn!("No background image loaded, keeping blurred background");
                return;
            }
        };

        let fitted = fit_background(image, width, height);
        tracing::info!(
            "Background image {}x{} fitted to {}x{}",
            image.width(),
            image.height(),
            width,
            height
        );
        self.substitute = Substitute::Fitted(fitted);
    }

    pub fn has_fixed_background(&self) -> bool {
        matches!(self.substitute, Substitute::Fitted(_))
    }

    /// Forget temporal model state, e.g. after the camera stopped delivering
    pub fn reset_segmentation(&mut self) {
        self.model.reset_state();
    }

    /// Mirror `frame`, segment it and replace its background
    pub fn blur_background(&mut self, frame: &RgbImage) -> Result<RgbImage, SegmentationError> {
        let mirrored = imageops::flip_horizontal(frame);
        let matte = self.model.segment(&mirrored)?;

        if matte.dimensions() != mirrored.dimensions() {
            return Err(SegmentationError::Shape(vec![
                matte.height() as usize,
                matte.width() as usize,
            ]));
        }

        if self.show_matte {
            return Ok(Preprocessor::matte_to_rgb(&matte));
        }

        let _span = tracing::debug_span!("composite").entered();
        let output = match self.fixed_background(mirrored.dimensions()) {
            Some(background) => composite(&mirrored, &matte, background),
            None => {
                let blurred = blur_frame(&mirrored);
                composite(&mirrored, &matte, &blurred)
            }
        };

        Ok(output)
    }

    fn fixed_background(&mut self, dimensions: (u32, u32)) -> Option<&RgbImage> {
        let usable = match &self.substitute {
            Substitute::Blur => return None,
            Substitute::Fitted(image) => image.dimensions() == dimensions,
            Substitute::Loaded(_) => false,
        };

        if !usable {
            if !self.fallback_noticed {
                tracing::warn!(
                    "Background image is not sized to {}x{}, using blurred background",
                    dimensions.0,
                    dimensions.1
                );
                self.fallback_noticed = true;
            }
            return None;
        }

        match &self.substitute {
            Substitute::Fitted(image) => Some(image),
            _ => None,
        }
    }
}

/// Gaussian blur with a [`BACKGROUND_KERNEL`]-sized kernel
pub fn blur_frame(frame: &RgbImage) -> RgbImage {
    let _span = tracing::debug_span!("background_blur").entered();
    imageops::blur_advanced(
        frame,
        GaussianBlurParameters::new_from_kernel_size(BACKGROUND_KERNEL),
    )
}

/// Scale `background` to cover `width` x `height` preserving its aspect ratio,
/// then crop to exactly that size anchored at the top-left corner.
pub fn fit_background(background: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (bg_width, bg_height) = background.dimensions();
    if (bg_width, bg_height) == (width, height) {
        return background.clone();
    }

    let scale = f64::max(
        width as f64 / bg_width as f64,
        height as f64 / bg_height as f64,
    );

    let scaled_width = ((bg_width as f64 * scale).ceil() as u32).max(width);
    let scaled_height = ((bg_height as f64 * scale).ceil() as u32).max(height);

    let scaled = imageops::resize(
        background,
        scaled_width,
        scaled_height,
        imageops::FilterType::Triangle,
    );
    imageops::crop_imm(&scaled, 0, 0, width, height).to_image()
}

/// Take `foreground` where the matte is above [`FOREGROUND_THRESHOLD`], else `background`
pub fn composite(foreground: &RgbImage, matte: &Matte, background: &RgbImage) -> RgbImage {
    RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        if matte.get_pixel(x, y)[0] > FOREGROUND_THRESHOLD {
            *foreground.get_pixel(x, y)
        } else {
            *background.get_pixel(x, y)
        }
    })
}
