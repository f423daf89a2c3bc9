//! Frozen loss targets for one run.

use crate::error::{PasticheError, Result};
use crate::image::image_dims;
use crate::loss::{ContentLoss, StyleLoss, TotalVariationLoss};
use crate::model::FeatureExtractor;
use candle_core::{DType, Tensor};
use tracing::info;

/// Loss modules built from the content and style images.
#[derive(Debug, Clone)]
pub struct LossStack {
    /// One loss per content layer, in extractor order.
    pub content: Vec<ContentLoss>,
    /// One loss per style layer, in extractor order.
    pub style: Vec<StyleLoss>,
    /// Smoothness term on the candidate.
    pub tv: TotalVariationLoss,
    /// Spatial size `(height, width)` the candidate must have.
    pub image_dims: (usize, usize),
}

impl LossStack {
    /// Assemble a stack from prebuilt losses.
    pub fn new(
        content: Vec<ContentLoss>,
        style: Vec<StyleLoss>,
        tv: TotalVariationLoss,
        image_dims: (usize, usize),
    ) -> Self {
        Self {
            content,
            style,
            tv,
            image_dims,
        }
    }

    /// Capture targets from the content and style images.
    ///
    /// Both images must share spatial dimensions. Style layer `i` is weighted
    /// `(i + 1)^2`.
    pub fn capture(
        extractor: &FeatureExtractor,
        content_image: &Tensor,
        style_image: &Tensor,
        style_threshold: f64,
        tv: TotalVariationLoss,
    ) -> Result<Self> {
        let content_dims = image_dims(content_image)?;
        let style_dims = image_dims(style_image)?;
        if content_dims != style_dims {
            return Err(PasticheError::DimensionMismatch {
                expected: content_dims,
                actual: style_dims,
                context: "style image".to_string(),
            });
        }

        let (content_maps, _) = extractor.extract(&content_image.detach())?;
        let (_, style_maps) = extractor.extract(&style_image.detach())?;

        let content = content_maps.iter().map(ContentLoss::new).collect();
        let style = style_maps
            .iter()
            .enumerate()
            .map(|(i, map)| StyleLoss::for_layer(map, i, style_threshold))
            .collect::<Result<Vec<_>>>()?;

        info!(
            content_layers = content_maps.len(),
            style_layers = style_maps.len(),
            height = content_dims.0,
            width = content_dims.1,
            "captured loss targets"
        );

        Ok(Self::new(content, style, tv, content_dims))
    }

    /// Apply one style threshold to every style loss.
    pub fn with_style_threshold(mut self, style_threshold: f64) -> Self {
        self.style = self
            .style
            .into_iter()
            .map(|s| s.with_threshold(style_threshold))
            .collect();
        self
    }

    /// Unweighted `(content, style, tv)` terms for `image`.
    pub(crate) fn terms(
        &self,
        extractor: &FeatureExtractor,
        image: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let (content_maps, style_maps) = extractor.extract(image)?;
        if content_maps.len() != self.content.len() || style_maps.len() != self.style.len() {
            return Err(PasticheError::InvalidConfig(format!(
                "extractor yields {} content and {} style maps, losses expect {} and {}",
                content_maps.len(),
                style_maps.len(),
                self.content.len(),
                self.style.len()
            )));
        }

        let zero = Tensor::zeros((), DType::F32, image.device())?;
        let mut content = zero.clone();
        for (loss, map) in self.content.iter().zip(&content_maps) {
            content = (content + loss.compute(map)?)?;
        }
        let mut style = zero;
        for (loss, map) in self.style.iter().zip(&style_maps) {
            style = (style + loss.compute(map)?)?;
        }
        let tv = self.tv.compute(image)?;

        Ok((content, style, tv))
    }

    /// Name of the first layer whose `term` loss is NaN or infinite.
    ///
    /// Only content and style are per layer; other terms yield `None`, as
    /// does a sum that overflowed from finite layer values.
    pub(crate) fn non_finite_layer(
        &self,
        extractor: &FeatureExtractor,
        image: &Tensor,
        term: &str,
    ) -> Result<Option<String>> {
        let (content_maps, style_maps) = extractor.extract(image)?;
        let finite = |t: Tensor| -> Result<bool> { Ok(t.to_scalar::<f32>()?.is_finite()) };

        match term {
            "content" => {
                for ((loss, map), name) in self
                    .content
                    .iter()
                    .zip(&content_maps)
                    .zip(extractor.content_layers())
                {
                    if !finite(loss.compute(map)?)? {
                        return Ok(Some(name.to_string()));
                    }
                }
            }
            "style" => {
                for ((loss, map), name) in self
                    .style
                    .iter()
                    .zip(&style_maps)
                    .zip(extractor.style_layers())
                {
                    if !finite(loss.compute(map)?)? {
                        return Ok(Some(name.to_string()));
                    }
                }
            }
            _ => {}
        }
        Ok(None)
    }
}
