//! Weak and strong perturbations of training examples
//!
//! Examples are flat CHW `f32` buffers. CIFAR10 images hold values in
//! `[0, 1]`; UBS8K spectrograms hold log-mel energies. Each pool picks one
//! augmentation per call and applies it with the pool's probability:
//!
//! - **CIFAR10 weak**: horizontal flip, small cutout, horizontal or vertical translation
//! - **CIFAR10 strong**: large cutout or RandAugment
//! - **UBS8K weak**: horizontal (time) flip, time occlusion
//! - **UBS8K strong**: noise, spectrogram cutout, time and frequency dropout

use image::{imageops, GrayImage, ImageBuffer, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::{AugmentStrength, DatasetName, RunConfig};
use crate::utils::error::{Result, ResultExt, SslError};

/// Colour and geometric operations sampled by RandAugment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandOp {
    AutoContrast,
    Brightness,
    Contrast,
    HueRotate,
    Invert,
    Grayscale,
    Posterize,
    Rotate,
    Solarize,
}

impl RandOp {
    pub const ALL: [RandOp; 9] = [
        RandOp::AutoContrast,
        RandOp::Brightness,
        RandOp::Contrast,
        RandOp::HueRotate,
        RandOp::Invert,
        RandOp::Grayscale,
        RandOp::Posterize,
        RandOp::Rotate,
        RandOp::Solarize,
    ];
}

/// One perturbation with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Augment {
    HorizontalFlip,
    /// Fill a random rectangle. `fill: None` uses the example's minimum value.
    CutOut {
        width_scale: (f32, f32),
        height_scale: (f32, f32),
        fill: Option<f32>,
    },
    /// Shift along the width axis by a fraction of the width, zero padded
    TranslateX { deltas: (f32, f32) },
    /// Shift along the height axis by a fraction of the height, zero padded
    TranslateY { deltas: (f32, f32) },
    /// `magnitude` in `[0, 10]`, sampled per call when unset
    RandAugment {
        magnitude: Option<f32>,
        nb_choices: usize,
    },
    /// Zero a random span of time frames, up to `max_size` of the width
    Occlusion { max_size: f32 },
    /// Additive gaussian noise at a target signal-to-noise ratio in dB
    Noise { target_snr: f32 },
    /// Zero each time frame with probability `dropout`
    TimeDropout { dropout: f32 },
    /// Zero each frequency bin with probability `dropout`
    FreqDropout { dropout: f32 },
}

impl Augment {
    pub fn apply<R: Rng>(&self, data: &mut [f32], shape: [usize; 3], rng: &mut R) -> Result<()> {
        let [channels, height, width] = shape;
        if data.len() != channels * height * width {
            return Err(SslError::Shape(format!(
                "Example of {} values does not match shape {:?}",
                data.len(),
                shape
            )));
        }

        match self {
            Augment::HorizontalFlip => {
                for row in data.chunks_mut(width) {
                    row.reverse();
                }
            }
            Augment::CutOut {
                width_scale,
                height_scale,
                fill,
            } => {
                let fill = match fill {
                    Some(value) => *value,
                    None => data.iter().copied().fold(f32::INFINITY, f32::min),
                };
                let rect_w = scaled(width, sample_range(rng, *width_scale));
                let rect_h = scaled(height, sample_range(rng, *height_scale));
                let x0 = rng.gen_range(0..=width - rect_w);
                let y0 = rng.gen_range(0..=height - rect_h);
                for c in 0..channels {
                    for y in y0..y0 + rect_h {
                        let start = (c * height + y) * width + x0;
                        data[start..start + rect_w].fill(fill);
                    }
                }
            }
            Augment::TranslateX { deltas } => {
                let shift = signed_shift(rng, width, *deltas);
                translate(data, shape, 0, shift);
            }
            Augment::TranslateY { deltas } => {
                let shift = signed_shift(rng, height, *deltas);
                translate(data, shape, shift, 0);
            }
            Augment::RandAugment {
                magnitude,
                nb_choices,
            } => rand_augment(data, shape, *magnitude, *nb_choices, rng)?,
            Augment::Occlusion { max_size } => {
                let span = rng.gen_range(0..=scaled(width, *max_size));
                let x0 = rng.gen_range(0..=width - span);
                for row in data.chunks_mut(width) {
                    row[x0..x0 + span].fill(0.0);
                }
            }
            Augment::Noise { target_snr } => {
                let power = data.iter().map(|v| v * v).sum::<f32>() / data.len().max(1) as f32;
                let std = (power / 10f32.powf(target_snr / 10.0)).sqrt();
                if std > 0.0 {
                    let normal = Normal::new(0.0, std).dataset_context(&format!("Invalid noise std {}", std))?;
                    for v in data.iter_mut() {
                        *v += normal.sample(rng);
                    }
                }
            }
            Augment::TimeDropout { dropout } => {
                for x in 0..width {
                    if rng.gen::<f32>() < *dropout {
                        for row in data.chunks_mut(width) {
                            row[x] = 0.0;
                        }
                    }
                }
            }
            Augment::FreqDropout { dropout } => {
                for y in 0..height {
                    if rng.gen::<f32>() < *dropout {
                        for c in 0..channels {
                            let start = (c * height + y) * width;
                            data[start..start + width].fill(0.0);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn sample_range<R: Rng>(rng: &mut R, (low, high): (f32, f32)) -> f32 {
    if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    }
}

fn scaled(size: usize, ratio: f32) -> usize {
    ((size as f32 * ratio).round() as usize).clamp(0, size)
}

fn signed_shift<R: Rng>(rng: &mut R, size: usize, deltas: (f32, f32)) -> isize {
    let shift = scaled(size, sample_range(rng, deltas)) as isize;
    if rng.gen_bool(0.5) {
        shift
    } else {
        -shift
    }
}

/// Move every channel by `(dy, dx)` pixels, uncovered pixels become 0
fn translate(data: &mut [f32], [channels, height, width]: [usize; 3], dy: isize, dx: isize) {
    let source = data.to_vec();
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                let sy = y as isize - dy;
                let sx = x as isize - dx;
                let inside = (0..height as isize).contains(&sy) && (0..width as isize).contains(&sx);
                data[(c * height + y) * width + x] = if inside {
                    source[(c * height + sy as usize) * width + sx as usize]
                } else {
                    0.0
                };
            }
        }
    }
}

fn to_rgb(data: &[f32], height: usize, width: usize) -> RgbImage {
    let plane = height * width;
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        let px = |c: usize| (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb([px(0), px(1), px(2)])
    })
}

fn from_rgb(img: &RgbImage, data: &mut [f32]) {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    for (x, y, pixel) in img.enumerate_pixels() {
        let i = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

fn rand_augment<R: Rng>(
    data: &mut [f32],
    [channels, height, width]: [usize; 3],
    magnitude: Option<f32>,
    nb_choices: usize,
    rng: &mut R,
) -> Result<()> {
    if channels != 3 {
        return Err(SslError::Dataset(format!(
            "RandAugment needs RGB examples, got {} channels",
            channels
        )));
    }
    let mut img = to_rgb(data, height, width);

    for _ in 0..nb_choices {
        let level = magnitude.unwrap_or_else(|| rng.gen_range(0.0..=10.0)) / 10.0;
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let op = RandOp::ALL.choose(rng).copied().unwrap_or(RandOp::AutoContrast);
        img = match op {
            RandOp::AutoContrast => auto_contrast(&img),
            RandOp::Brightness => imageops::brighten(&img, (sign * level * 100.0) as i32),
            RandOp::Contrast => imageops::contrast(&img, sign * level * 60.0),
            RandOp::HueRotate => imageops::huerotate(&img, (sign * level * 180.0) as i32),
            RandOp::Invert => {
                imageops::invert(&mut img);
                img
            }
            RandOp::Grayscale => gray_to_rgb(&imageops::grayscale(&img)),
            RandOp::Posterize => {
                let bits = 8 - (level * 4.0).round() as u32;
                let mask = !((1u16 << (8 - bits)) - 1) as u8;
                let mut out = img;
                out.pixels_mut()
                    .for_each(|p| p.0.iter_mut().for_each(|v| *v &= mask));
                out
            }
            RandOp::Rotate => rotate(&img, sign * level * 30.0),
            RandOp::Solarize => {
                let threshold = (255.0 * (1.0 - level)) as u8;
                let mut out = img;
                out.pixels_mut().for_each(|p| {
                    p.0.iter_mut().for_each(|v| {
                        if *v >= threshold {
                            *v = 255 - *v
                        }
                    })
                });
                out
            }
        };
    }

    from_rgb(&img, data);
    Ok(())
}

/// Stretch each channel to the full `[0, 255]` range
fn auto_contrast(img: &RgbImage) -> RgbImage {
    let mut low = [u8::MAX; 3];
    let mut high = [u8::MIN; 3];
    for pixel in img.pixels() {
        for c in 0..3 {
            low[c] = low[c].min(pixel[c]);
            high[c] = high[c].max(pixel[c]);
        }
    }
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            if high[c] > low[c] {
                let v = (pixel[c] - low[c]) as f32 * 255.0 / (high[c] - low[c]) as f32;
                pixel[c] = v.round() as u8;
            }
        }
    }
    out
}

/// Rotate around the centre with bilinear sampling, black outside
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }
    let (width, height) = img.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        bilinear_sample(img, cx + dx * cos_a + dy * sin_a, cy - dx * sin_a + dy * cos_a)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= width as f32 - 1.0 || y >= height as f32 - 1.0 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let (p00, p10) = (img.get_pixel(x0, y0), img.get_pixel(x1, y0));
    let (p01, p11) = (img.get_pixel(x0, y1), img.get_pixel(x1, y1));

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}

/// Pick one augmentation at random, then apply it with probability `ratio`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomChoice {
    pub ratio: f64,
    pub augments: Vec<Augment>,
}

impl RandomChoice {
    pub fn apply<R: Rng>(&self, data: &mut [f32], shape: [usize; 3], rng: &mut R) -> Result<()> {
        let Some(augment) = self.augments.choose(rng) else {
            return Ok(());
        };
        if rng.gen_bool(self.ratio.clamp(0.0, 1.0)) {
            augment.apply(data, shape, rng)?;
        }
        Ok(())
    }
}

/// The weak and strong pools of a dataset, written to `augments.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentSet {
    pub weak: RandomChoice,
    pub strong: RandomChoice,
}

impl AugmentSet {
    pub fn cifar10(config: &RunConfig) -> Self {
        Self {
            weak: RandomChoice {
                ratio: 0.5,
                augments: vec![
                    Augment::HorizontalFlip,
                    Augment::CutOut {
                        width_scale: (0.1, 0.1),
                        height_scale: (0.1, 0.1),
                        fill: Some(0.0),
                    },
                    Augment::TranslateX {
                        deltas: (2.0 / 32.0, 6.0 / 32.0),
                    },
                    Augment::TranslateY {
                        deltas: (2.0 / 32.0, 6.0 / 32.0),
                    },
                ],
            },
            strong: RandomChoice {
                ratio: 1.0,
                augments: vec![
                    Augment::CutOut {
                        width_scale: (0.25, 0.75),
                        height_scale: (0.25, 0.75),
                        fill: Some(0.0),
                    },
                    Augment::RandAugment {
                        magnitude: config.ra_magnitude.map(|m| m as f32),
                        nb_choices: config.ra_nb_choices,
                    },
                ],
            },
        }
    }

    pub fn ubs8k() -> Self {
        Self {
            weak: RandomChoice {
                ratio: 0.5,
                augments: vec![Augment::HorizontalFlip, Augment::Occlusion { max_size: 1.0 }],
            },
            strong: RandomChoice {
                ratio: 1.0,
                augments: vec![
                    Augment::Noise { target_snr: 15.0 },
                    Augment::CutOut {
                        width_scale: (0.1, 0.25),
                        height_scale: (0.1, 0.25),
                        fill: None,
                    },
                    Augment::TimeDropout { dropout: 0.01 },
                    Augment::FreqDropout { dropout: 0.01 },
                    Augment::Noise { target_snr: 5.0 },
                ],
            },
        }
    }

    pub fn for_config(config: &RunConfig) -> Self {
        match config.dataset_name {
            DatasetName::Cifar10 => Self::cifar10(config),
            DatasetName::Ubs8k => Self::ubs8k(),
        }
    }

    /// Copy of `data` perturbed by the requested pool
    pub fn view<R: Rng>(
        &self,
        data: &[f32],
        shape: [usize; 3],
        strength: AugmentStrength,
        rng: &mut R,
    ) -> Result<Vec<f32>> {
        let mut out = data.to_vec();
        match strength {
            AugmentStrength::None => {}
            AugmentStrength::Weak => self.weak.apply(&mut out, shape, rng)?,
            AugmentStrength::Strong => self.strong.apply(&mut out, shape, rng)?,
        }
        Ok(out)
    }
}
