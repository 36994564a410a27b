//! Perceptual image matching.
//!
//! Fingerprints are 64-bit DCT hashes: grayscale, resize to 32x32, 2-D
//! DCT-II, keep the 8x8 low-frequency block, threshold against its median.
//! Hamming distance between fingerprints approximates visual dissimilarity
//! and is robust to resizing and recompression. Rough bands: 0 identical,
//! 1-5 same product, 6-10 likely same (verify), 11+ different.

use tracing::{debug, warn};

use crate::adapters::ImageFetcher;
use crate::error::{ResearchError, Result};
use crate::models::{CandidateListing, MatchResult};

const HASH_SIZE: usize = 8;
const IMG_SIZE: usize = 32;

/// A 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hamming distance: count of differing bits. Symmetric, zero on self.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Compute the perceptual fingerprint of an encoded image.
pub fn fingerprint_bytes(bytes: &[u8]) -> Result<Fingerprint> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ResearchError::ImageDecode(e.to_string()))?;
    let gray = img
        .resize_exact(
            IMG_SIZE as u32,
            IMG_SIZE as u32,
            image::imageops::FilterType::Lanczos3,
        )
        .to_luma8();

    let mut pixels = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for (y, row) in pixels.iter_mut().enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = gray.get_pixel(x as u32, y as u32).0[0] as f64;
        }
    }

    let freq = dct_2d(&pixels);

    // Low-frequency 8x8 block carries the image's coarse structure.
    let mut block = [0.0f64; HASH_SIZE * HASH_SIZE];
    for y in 0..HASH_SIZE {
        for x in 0..HASH_SIZE {
            block[y * HASH_SIZE + x] = freq[y][x];
        }
    }

    let median = median_of(&block);
    let mut bits = 0u64;
    for (i, v) in block.iter().enumerate() {
        if *v > median {
            bits |= 1 << i;
        }
    }
    Ok(Fingerprint(bits))
}

/// Orthonormal DCT-II over rows then columns.
fn dct_2d(input: &[[f64; IMG_SIZE]; IMG_SIZE]) -> [[f64; IMG_SIZE]; IMG_SIZE] {
    let n = IMG_SIZE;
    let mut cos_table = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for (k, row) in cos_table.iter_mut().enumerate() {
        for (i, c) in row.iter_mut().enumerate() {
            *c = (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos();
        }
    }

    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();

    let mut rows = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for y in 0..n {
        for k in 0..n {
            let mut sum = 0.0;
            for i in 0..n {
                sum += input[y][i] * cos_table[k][i];
            }
            rows[y][k] = sum * if k == 0 { scale0 } else { scale };
        }
    }

    let mut out = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for x in 0..n {
        for k in 0..n {
            let mut sum = 0.0;
            for i in 0..n {
                sum += rows[i][x] * cos_table[k][i];
            }
            out[k][x] = sum * if k == 0 { scale0 } else { scale };
        }
    }
    out
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub struct PerceptualMatcher<'a, F: ImageFetcher + ?Sized> {
    fetcher: &'a F,
    threshold: u32,
}

impl<'a, F: ImageFetcher + ?Sized> PerceptualMatcher<'a, F> {
    pub fn new(fetcher: &'a F, threshold: u32) -> Self {
        Self { fetcher, threshold }
    }

    async fn fingerprint_url(&self, url: &str) -> Result<Fingerprint> {
        let bytes = self.fetcher.fetch(url).await?;
        fingerprint_bytes(&bytes)
    }

    /// Find the visually closest candidate to the reference image.
    ///
    /// The reference must be fetchable and decodable; a failure there fails
    /// the whole listing. Per-candidate failures (unreachable/undecodable
    /// image) only exclude that candidate. Ties on distance go to the
    /// cheapest candidate. A zero distance is returned immediately.
    pub async fn best_match(
        &self,
        reference_url: &str,
        candidates: &[CandidateListing],
    ) -> Result<MatchResult> {
        if candidates.is_empty() {
            return Ok(MatchResult::no_match());
        }

        let reference = self.fingerprint_url(reference_url).await?;

        let mut best: Option<(u32, &CandidateListing)> = None;
        for candidate in candidates {
            let hash = match self.fingerprint_url(&candidate.image_url).await {
                Ok(h) => h,
                Err(e) if e.triggers_pause() => return Err(e),
                Err(e) => {
                    warn!(
                        candidate_url = %candidate.url,
                        error = %e,
                        "candidate image unusable, excluding"
                    );
                    continue;
                }
            };
            let distance = reference.distance(&hash);
            debug!(candidate_url = %candidate.url, distance, "candidate scored");

            if distance == 0 {
                return Ok(MatchResult {
                    candidate: Some(candidate.clone()),
                    distance: Some(0),
                    is_matched: true,
                });
            }

            let better = match best {
                None => true,
                Some((d, c)) => {
                    distance < d || (distance == d && candidate.price_cny < c.price_cny)
                }
            };
            if better {
                best = Some((distance, candidate));
            }
        }

        let Some((distance, candidate)) = best else {
            // Every candidate image failed; not an error for the listing.
            return Ok(MatchResult::no_match());
        };

        Ok(MatchResult {
            candidate: Some(candidate.clone()),
            distance: Some(distance),
            is_matched: distance <= self.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageOutputFormat, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    /// Flat color with a centered square of another color, so hashes of
    /// different layouts actually differ.
    fn test_image(bg: [u8; 3], square: [u8; 3], square_size: u32) -> Vec<u8> {
        let mut img = RgbImage::from_pixel(64, 64, image::Rgb(bg));
        let start = 32 - square_size / 2;
        for y in start..start + square_size {
            for x in start..start + square_size {
                img.put_pixel(x, y, image::Rgb(square));
            }
        }
        encode_png(&img)
    }

    struct MapFetcher {
        images: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ImageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.images
                .get(url)
                .cloned()
                .ok_or_else(|| ResearchError::Transport(format!("no image at {}", url)))
        }
    }

    fn candidate(image_url: &str, price_cny: f64) -> CandidateListing {
        CandidateListing {
            price_cny,
            image_url: image_url.to_string(),
            url: format!("https://target.example/{}", image_url),
            shop_name: None,
            min_order: None,
        }
    }

    #[test]
    fn test_distance_symmetric_and_zero_on_self() {
        let a = fingerprint_bytes(&test_image([255, 255, 255], [0, 0, 0], 20)).unwrap();
        let b = fingerprint_bytes(&test_image([0, 0, 0], [255, 255, 255], 40)).unwrap();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), 0);
        assert_eq!(b.distance(&b), 0);
    }

    #[test]
    fn test_identical_content_identical_hash() {
        let img1 = test_image([200, 10, 10], [10, 200, 10], 24);
        let img2 = test_image([200, 10, 10], [10, 200, 10], 24);
        assert_eq!(
            fingerprint_bytes(&img1).unwrap(),
            fingerprint_bytes(&img2).unwrap()
        );
    }

    #[test]
    fn test_resized_image_hashes_close() {
        let big = test_image([255, 255, 255], [0, 0, 0], 32);
        let img = image::load_from_memory(&big).unwrap();
        let small = img.resize_exact(40, 40, image::imageops::FilterType::Lanczos3);
        let mut buf = Cursor::new(Vec::new());
        small.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
        let h1 = fingerprint_bytes(&big).unwrap();
        let h2 = fingerprint_bytes(&buf.into_inner()).unwrap();
        assert!(h1.distance(&h2) <= 5, "distance {}", h1.distance(&h2));
    }

    #[test]
    fn test_undecodable_bytes_error() {
        assert!(matches!(
            fingerprint_bytes(b"definitely not an image"),
            Err(ResearchError::ImageDecode(_))
        ));
    }

    #[tokio::test]
    async fn test_no_candidates_is_no_match() {
        let fetcher = MapFetcher {
            images: HashMap::new(),
        };
        let matcher = PerceptualMatcher::new(&fetcher, 10);
        let result = matcher.best_match("ref.jpg", &[]).await.unwrap();
        assert!(!result.is_matched);
        assert!(result.candidate.is_none());
    }

    #[tokio::test]
    async fn test_identical_candidate_wins_with_zero_distance() {
        let reference = test_image([255, 255, 255], [0, 0, 0], 20);
        let other = test_image([0, 0, 0], [255, 255, 255], 44);
        let mut images = HashMap::new();
        images.insert("ref.png".to_string(), reference.clone());
        images.insert("same.png".to_string(), reference);
        images.insert("other.png".to_string(), other);
        let fetcher = MapFetcher { images };
        let matcher = PerceptualMatcher::new(&fetcher, 10);

        let candidates = vec![candidate("other.png", 5.0), candidate("same.png", 12.0)];
        let result = matcher.best_match("ref.png", &candidates).await.unwrap();
        assert!(result.is_matched);
        assert_eq!(result.distance, Some(0));
        assert_eq!(result.candidate.unwrap().image_url, "same.png");
    }

    #[tokio::test]
    async fn test_tie_broken_by_lowest_price() {
        let reference = test_image([255, 255, 255], [0, 0, 0], 20);
        let mut images = HashMap::new();
        images.insert("ref.png".to_string(), reference.clone());
        // Both candidates are pixel-identical to each other (distance tie)
        // but structurally unlike the reference, so neither scores zero.
        let twin = {
            let mut img = RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255]));
            for y in 0..32 {
                for x in 0..64 {
                    img.put_pixel(x, y, image::Rgb([0, 0, 0]));
                }
            }
            encode_png(&img)
        };
        images.insert("pricey.png".to_string(), twin.clone());
        images.insert("cheap.png".to_string(), twin);
        let fetcher = MapFetcher { images };
        let matcher = PerceptualMatcher::new(&fetcher, 64);

        let candidates = vec![candidate("pricey.png", 20.0), candidate("cheap.png", 8.5)];
        let result = matcher.best_match("ref.png", &candidates).await.unwrap();
        assert_eq!(result.candidate.unwrap().image_url, "cheap.png");
    }

    #[tokio::test]
    async fn test_broken_candidate_excluded_not_fatal() {
        let reference = test_image([255, 255, 255], [0, 0, 0], 20);
        let mut images = HashMap::new();
        images.insert("ref.png".to_string(), reference.clone());
        images.insert("broken.png".to_string(), b"garbage".to_vec());
        images.insert("good.png".to_string(), reference);
        let fetcher = MapFetcher { images };
        let matcher = PerceptualMatcher::new(&fetcher, 10);

        let candidates = vec![candidate("broken.png", 3.0), candidate("good.png", 9.0)];
        let result = matcher.best_match("ref.png", &candidates).await.unwrap();
        assert!(result.is_matched);
        assert_eq!(result.candidate.unwrap().image_url, "good.png");
    }

    #[tokio::test]
    async fn test_all_candidates_broken_is_no_match() {
        let reference = test_image([255, 255, 255], [0, 0, 0], 20);
        let mut images = HashMap::new();
        images.insert("ref.png".to_string(), reference);
        images.insert("broken.png".to_string(), b"garbage".to_vec());
        let fetcher = MapFetcher { images };
        let matcher = PerceptualMatcher::new(&fetcher, 10);

        let result = matcher
            .best_match("ref.png", &[candidate("broken.png", 3.0)])
            .await
            .unwrap();
        assert!(!result.is_matched);
        assert!(result.candidate.is_none());
    }

    #[tokio::test]
    async fn test_threshold_monotonicity() {
        // For a fixed distance d, matching at threshold t implies matching
        // at every t' > t.
        let reference = test_image([255, 255, 255], [0, 0, 0], 20);
        let different = test_image([0, 0, 0], [255, 255, 255], 44);
        let mut images = HashMap::new();
        images.insert("ref.png".to_string(), reference);
        images.insert("cand.png".to_string(), different);
        let fetcher = MapFetcher { images };

        let mut matched_after_first_match = true;
        let mut seen_match = false;
        for threshold in 0..=64u32 {
            let matcher = PerceptualMatcher::new(&fetcher, threshold);
            let result = matcher
                .best_match("ref.png", &[candidate("cand.png", 1.0)])
                .await
                .unwrap();
            if seen_match && !result.is_matched {
                matched_after_first_match = false;
            }
            if result.is_matched {
                seen_match = true;
            }
        }
        assert!(matched_after_first_match);
        assert!(seen_match, "distance must be <= 64 so threshold 64 matches");
    }
}
