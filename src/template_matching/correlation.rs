/// Score maps for the supported comparison methods
///
/// Every map holds a confidence in [0, 1] per template position, higher is
/// better, so callers never need to know which method produced it.
use crate::config::MatchMethod;
use image::GrayImage;
use imageproc::template_matching::{MatchTemplateMethod, match_template};

/// Confidence per top-left template position, row major.
#[derive(Debug, Clone)]
pub struct ScoreMap {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl ScoreMap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.scores[(y * self.width + x) as usize]
    }

    /// Highest score; the first one in raster order wins ties.
    pub fn best(&self) -> Option<(u32, u32, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &score) in self.scores.iter().enumerate() {
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        best.map(|(i, score)| self.position(i, score))
    }

    /// Every position scoring at least `threshold`, in raster order.
    pub fn above(&self, threshold: f32) -> Vec<(u32, u32, f32)> {
        self.scores
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s >= threshold)
            .map(|(i, &s)| self.position(i, s))
            .collect()
    }

    fn position(&self, i: usize, score: f32) -> (u32, u32, f32) {
        let i = i as u32;
        (i % self.width, i / self.width, score)
    }

    /// Element-wise mean of maps with identical dimensions.
    pub fn average(maps: &[ScoreMap]) -> Option<ScoreMap> {
        let first = maps.first()?;
        let mut scores = first.scores.clone();
        for map in &maps[1..] {
            for (acc, s) in scores.iter_mut().zip(&map.scores) {
                *acc += s;
            }
        }
        let n = maps.len() as f32;
        scores.iter_mut().for_each(|s| *s /= n);
        Some(ScoreMap {
            width: first.width,
            height: first.height,
            scores,
        })
    }
}

fn clamp_confidence(score: f64) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Scores `template` at every position inside `image`.
///
/// Returns `None` when the template does not fit.
pub fn score_map(image: &GrayImage, template: &GrayImage, method: MatchMethod) -> Option<ScoreMap> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return None;
    }
    let map = match method {
        MatchMethod::CcoeffNormed => ccoeff_normed(image, template),
        MatchMethod::CcorrNormed => {
            let raw = match_template(image, template, MatchTemplateMethod::CrossCorrelationNormalized);
            ScoreMap {
                width: raw.width(),
                height: raw.height(),
                scores: raw.pixels().map(|p| clamp_confidence(p[0] as f64)).collect(),
            }
        }
        MatchMethod::SqdiffNormed => {
            let raw = match_template(image, template, MatchTemplateMethod::SumOfSquaredErrorsNormalized);
            ScoreMap {
                width: raw.width(),
                height: raw.height(),
                scores: raw
                    .pixels()
                    .map(|p| clamp_confidence(1.0 - p[0] as f64))
                    .collect(),
            }
        }
    };
    Some(map)
}

/// Summed-area tables of pixel values and squared pixel values.
struct WindowSums {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl WindowSums {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sum_sq = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32)[0] as u64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sum_sq[i] = sum_sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sum_sq }
    }

    /// (Σ v, Σ v²) over the `w`×`h` window with top-left (`x`, `y`).
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let s = self.stride;
        let pick = |t: &[u64]| (t[y1 * s + x1] + t[y0 * s + x0]) - (t[y0 * s + x1] + t[y1 * s + x0]);
        (pick(&self.sum) as f64, pick(&self.sum_sq) as f64)
    }
}

/// Zero-mean normalized cross-correlation from imageproc's raw correlation:
/// `(Σ I·T − mean(T)·Σ I) / sqrt((Σ I² − (Σ I)²/n) · Σ (T − mean(T))²)`.
/// Flat windows or a flat template score 0.
fn ccoeff_normed(image: &GrayImage, template: &GrayImage) -> ScoreMap {
    let raw = match_template(image, template, MatchTemplateMethod::CrossCorrelation);
    let (tw, th) = template.dimensions();
    let n = (tw * th) as f64;
    let t_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let t_var: f64 = template
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - t_mean;
            d * d
        })
        .sum();

    let sums = WindowSums::new(image);
    let mut scores = Vec::with_capacity((raw.width() * raw.height()) as usize);
    for y in 0..raw.height() {
        for x in 0..raw.width() {
            let (s1, s2) = sums.window(x, y, tw, th);
            let numerator = raw.get_pixel(x, y)[0] as f64 - t_mean * s1;
            let i_var = (s2 - s1 * s1 / n).max(0.0);
            let denominator = (i_var * t_var).sqrt();
            let score = if denominator < 1e-6 {
                0.0
            } else {
                numerator / denominator
            };
            scores.push(clamp_confidence(score));
        }
    }
    ScoreMap {
        width: raw.width(),
        height: raw.height(),
        scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([f(x, y)]))
    }

    #[test]
    fn window_sums_match_direct_sum() {
        let img = gray(7, 5, |x, y| (x * 31 + y * 17) as u8);
        let sums = WindowSums::new(&img);
        let (s1, s2) = sums.window(2, 1, 3, 4);
        let mut e1 = 0.0;
        let mut e2 = 0.0;
        for y in 1..5 {
            for x in 2..5 {
                let v = img.get_pixel(x, y)[0] as f64;
                e1 += v;
                e2 += v * v;
            }
        }
        assert_eq!((s1, s2), (e1, e2));
    }

    #[test]
    fn ccoeff_is_invariant_to_brightness_offset() {
        let template = gray(6, 6, |x, y| ((x * 37 + y * 11) % 97) as u8);
        let image = gray(6, 6, |x, y| ((x * 37 + y * 11) % 97) as u8 + 50);
        let map = score_map(&image, &template, MatchMethod::CcoeffNormed).unwrap();
        assert!(map.get(0, 0) > 0.999, "got {}", map.get(0, 0));
    }

    #[test]
    fn flat_window_scores_zero() {
        let template = gray(4, 4, |x, _| (x * 40) as u8);
        let image = gray(8, 8, |_, _| 90);
        let map = score_map(&image, &template, MatchMethod::CcoeffNormed).unwrap();
        assert_eq!(map.best().unwrap().2, 0.0);
    }

    #[test]
    fn oversized_template_has_no_map() {
        let template = gray(9, 2, |_, _| 1);
        let image = gray(8, 8, |_, _| 1);
        assert!(score_map(&image, &template, MatchMethod::SqdiffNormed).is_none());
    }

    #[test]
    fn best_prefers_first_of_equal_scores() {
        let map = ScoreMap {
            width: 3,
            height: 2,
            scores: vec![0.1, 0.9, 0.2, 0.9, 0.3, 0.0],
        };
        assert_eq!(map.best(), Some((1, 0, 0.9)));
        assert_eq!(map.above(0.25).len(), 3);
    }
}
