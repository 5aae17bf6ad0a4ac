// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
//! Reduces background images to a single representative colour so they can be
//! composited like any solid background.
use crate::background::BackgroundCache;
use crate::document::{DocumentTree, StyleProperty, StyleReader};
use crate::types::Colour;
use futures_util::StreamExt as _;
use futures_util::stream::FuturesUnordered;
use image::RgbaImage;
use indexmap::IndexMap;
use kmeans_colors::get_kmeans;
use palette::{IntoColor as _, Lab, LinSrgb, Srgb};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Weight of the most dominant palette entry against the palette mean.
const DOMINANT_WEIGHT: f32 = 0.8;
/// Pixels below this alpha are treated as holes in the image.
const MIN_PIXEL_ALPHA: u8 = 125;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read image {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("unsupported image location '{0}'")]
    UnsupportedUrl(String),
    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Extracts the dominant colours of a bitmap, most dominant first.
///
/// Quantizers run on the blocking thread pool, so they are cloned into it.
pub trait Quantizer: Clone + Send + 'static {
    fn palette(&self, image: &RgbaImage, size: usize) -> Vec<[u8; 3]>;
}

/// Fetches and decodes background images.
pub trait ImageSource {
    fn load(&self, url: &str) -> impl Future<Output = Result<RgbaImage, ImageError>>;
}

/// Clusters the visible pixels with k-means in Lab space and ranks the clusters
/// by population.
///
/// Each palette entry is the sRGB mean of its cluster's pixels, so a flat image
/// reports its exact colour.
#[derive(Debug, Clone, Copy)]
pub struct KmeansQuantizer {
    /// Upper bound on the number of pixels sampled from large images.
    pub max_samples: usize,
    pub max_iterations: usize,
    /// Stops iterating once centroids move less than this.
    pub converge: f32,
    /// Seed for centroid initialisation, fixed so palettes are reproducible.
    pub seed: u64,
}

impl Default for KmeansQuantizer {
    fn default() -> Self {
        Self {
            max_samples: 100_000,
            max_iterations: 20,
            converge: 1e-4,
            seed: 0,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Cluster {
    count: u64,
    sum: [u64; 3],
}

impl Quantizer for KmeansQuantizer {
    fn palette(&self, image: &RgbaImage, size: usize) -> Vec<[u8; 3]> {
        let total = image.width() as usize * image.height() as usize;
        let step = total.div_ceil(self.max_samples.max(1)).max(1);

        let samples: Vec<[u8; 3]> = image
            .pixels()
            .step_by(step)
            .filter(|pixel| pixel.0[3] >= MIN_PIXEL_ALPHA)
            .map(|pixel| [pixel.0[0], pixel.0[1], pixel.0[2]])
            .collect();

        // k-means cannot place more centroids than there are distinct colours.
        let distinct = samples.iter().collect::<HashSet<_>>().len();
        let k = size.min(distinct).min(usize::from(u8::MAX));
        if k == 0 {
            return Vec::new();
        }

        let mut lab_pixels: Vec<Lab> = Vec::with_capacity(samples.len());
        for &[r, g, b] in &samples {
            let linear: LinSrgb = Srgb::<u8>::new(r, g, b).into_linear();
            lab_pixels.push(linear.into_color());
        }
        let kmeans = get_kmeans(
            k,
            self.max_iterations,
            self.converge,
            false,
            &lab_pixels,
            self.seed,
        );

        let mut clusters = vec![Cluster::default(); kmeans.centroids.len()];
        for (&index, rgb) in kmeans.indices.iter().zip(&samples) {
            let cluster = &mut clusters[usize::from(index)];
            cluster.count += 1;
            for (sum, &channel) in cluster.sum.iter_mut().zip(rgb) {
                *sum += u64::from(channel);
            }
        }

        let mut ranked: Vec<(u64, [u8; 3])> = clusters
            .into_iter()
            .filter(|cluster| cluster.count > 0)
            .map(|cluster| {
                let mean = |sum: u64| ((sum + cluster.count / 2) / cluster.count) as u8;
                (
                    cluster.count,
                    [mean(cluster.sum[0]), mean(cluster.sum[1]), mean(cluster.sum[2])],
                )
            })
            .collect();
        // Ties are broken by colour so the palette is deterministic.
        ranked.sort_by(|(count_a, a), (count_b, b)| count_b.cmp(count_a).then(a.cmp(b)));
        ranked.into_iter().take(size).map(|(_, rgb)| rgb).collect()
    }
}

/// Blends the dominant palette entry with the palette mean.
///
/// Returns `None` for an empty palette, e.g. an image with no visible pixels.
pub fn representative_colour(palette: &[[u8; 3]]) -> Option<Colour> {
    let dominant = palette.first()?;
    let count = palette.len() as f32;
    let mean = |channel: usize| {
        palette
            .iter()
            .map(|colour| f32::from(colour[channel]))
            .sum::<f32>()
            / count
    };
    let blend = |channel: usize| {
        DOMINANT_WEIGHT * f32::from(dominant[channel]) + (1.0 - DOMINANT_WEIGHT) * mean(channel)
    };
    Some(Colour::rgb(blend(0), blend(1), blend(2)))
}

/// Splits a comma-separated CSS value into its top-level layers, leaving commas
/// inside parentheses or quotes alone.
fn split_layers(value: &str) -> Vec<&str> {
    let mut layers = Vec::new();
    let mut depth = 0_usize;
    let mut quote = None;
    let mut start = 0;
    for (index, c) in value.char_indices() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                layers.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    layers.push(value[start..].trim());
    layers
}

/// Extracts the location from a single `url(...)` layer.
fn parse_url_layer(layer: &str) -> Option<&str> {
    let inner = layer.strip_prefix("url(")?.strip_suffix(')')?.trim();
    let unquoted = inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(inner);
    (!unquoted.is_empty()).then_some(unquoted)
}

/// Extracts the location of the first `url(...)` layer of a background image value.
///
/// Returns `None` for `none` and for values made only of gradients or other
/// non-url images.
pub fn parse_css_url(value: &str) -> Option<&str> {
    split_layers(value).into_iter().find_map(parse_url_layer)
}

/// The background image url of `element`, if it declares one that tiles.
///
/// Non-repeating images are skipped: they are usually small decorations such as
/// list bullets rather than a backdrop for text.
pub fn background_image_url<E, S: StyleReader<E>>(styles: &S, element: E) -> Option<String>
where
    E: Copy,
{
    let value = styles.computed(element, StyleProperty::BackgroundImage);
    let url = parse_css_url(&value)?;
    let repeat = styles.computed(element, StyleProperty::BackgroundRepeat);
    (repeat.trim() != "no-repeat").then(|| url.to_owned())
}

/// For each element, the nearest ancestor-or-self with a tiling background image.
///
/// Ancestors are deduplicated so a shared image is fetched once.
pub fn find_image_ancestors<D, S>(
    tree: &D,
    styles: &S,
    elements: &[D::Element],
) -> IndexMap<D::Element, String>
where
    D: DocumentTree,
    S: StyleReader<D::Element>,
{
    let mut found = IndexMap::new();
    let mut checked: HashMap<D::Element, Option<D::Element>> = HashMap::new();

    for &element in elements {
        let mut walked = Vec::new();
        let mut current = Some(element);
        let mut owner = None;
        while let Some(el) = current {
            if let Some(&known) = checked.get(&el) {
                owner = known;
                break;
            }
            walked.push(el);
            if let Some(url) = background_image_url(styles, el) {
                found.entry(el).or_insert(url);
                owner = Some(el);
                break;
            }
            current = tree.parent(el);
        }
        for el in walked {
            checked.insert(el, owner);
        }
    }
    found
}

/// Outcome of resolving background images.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SeedReport {
    pub resolved: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Resolves background images to colours and seeds the background cache with them.
pub struct ImageColourResolver<'a, I, Q> {
    source: &'a I,
    quantizer: &'a Q,
    palette_size: usize,
    deadline: Duration,
}

impl<'a, I: ImageSource, Q: Quantizer> ImageColourResolver<'a, I, Q> {
    pub fn new(source: &'a I, quantizer: &'a Q, palette_size: usize, deadline: Duration) -> Self {
        Self {
            source,
            quantizer,
            palette_size: palette_size.max(1),
            deadline,
        }
    }

    /// Quantizes `image` on the blocking thread pool and blends its palette.
    pub async fn colour_of(&self, image: RgbaImage) -> Result<Option<Colour>, ImageError> {
        let quantizer = self.quantizer.clone();
        let size = self.palette_size;
        let palette =
            tokio::task::spawn_blocking(move || quantizer.palette(&image, size)).await?;
        Ok(representative_colour(&palette))
    }

    /// Loads every image concurrently and caches each colour under the element
    /// that declared it. Stops waiting once the deadline passes; images still
    /// loading then are abandoned and their elements left uncached.
    pub async fn seed<E>(
        &self,
        targets: IndexMap<E, String>,
        cache: &mut BackgroundCache<E>,
    ) -> SeedReport
    where
        E: Copy + Eq + Hash + std::fmt::Debug,
    {
        let mut report = SeedReport::default();
        let mut pending: FuturesUnordered<_> = targets
            .into_iter()
            .map(|(element, url)| async move {
                let result = match self.source.load(&url).await {
                    Ok(image) => self.colour_of(image).await,
                    Err(e) => Err(e),
                };
                (element, url, result)
            })
            .collect();

        let drained = tokio::time::timeout(self.deadline, async {
            while let Some((element, url, result)) = pending.next().await {
                match result {
                    Ok(Some(colour)) => {
                        log::debug!("background image {url} of {element:?} resolved to {colour}");
                        cache.insert(element, colour);
                        report.resolved += 1;
                    }
                    Ok(None) => {
                        log::debug!("background image {url} has no visible pixels");
                        report.failed += 1;
                    }
                    Err(e) => {
                        log::warn!("Skipping background image {url}: {e}");
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            report.abandoned = pending.len();
            log::warn!(
                "Gave up waiting for {} background image(s) after {:?}",
                report.abandoned,
                self.deadline
            );
        }
        report
    }
}

/// Loads images from the local filesystem, resolving relative urls against a base directory.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    base_dir: PathBuf,
}

impl FileImageSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve_path(&self, url: &str) -> Result<PathBuf, ImageError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") || url.starts_with("data:") {
            return Err(ImageError::UnsupportedUrl(url.to_owned()));
        }
        Ok(self.base_dir.join(url))
    }
}

impl ImageSource for FileImageSource {
    async fn load(&self, url: &str) -> Result<RgbaImage, ImageError> {
        let path = self.resolve_path(url)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ImageError::Io { path, source })?;
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|image| image.to_rgba8())
        })
        .await??;
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::tests::FakeDocument;

    fn solid_image(width: u32, height: u32, colour: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba(colour))
    }

    /// Serves images from memory; unknown urls fail and "slow" urls never finish.
    struct MemorySource {
        images: HashMap<String, RgbaImage>,
    }

    impl ImageSource for MemorySource {
        async fn load(&self, url: &str) -> Result<RgbaImage, ImageError> {
            if url.starts_with("slow") {
                std::future::pending::<()>().await;
            }
            self.images
                .get(url)
                .cloned()
                .ok_or_else(|| ImageError::UnsupportedUrl(url.to_owned()))
        }
    }

    #[test]
    fn test_kmeans_orders_by_population() {
        let mut image = solid_image(10, 1, [200, 10, 10, 255]);
        for x in 0..3 {
            image.put_pixel(x, 0, image::Rgba([10, 10, 200, 255]));
        }
        let palette = KmeansQuantizer::default().palette(&image, 5);
        assert_eq!(palette, vec![[200, 10, 10], [10, 10, 200]]);
    }

    #[test]
    fn test_kmeans_ignores_transparent_pixels() {
        let mut image = solid_image(4, 4, [0, 0, 0, 0]);
        image.put_pixel(1, 1, image::Rgba([40, 50, 60, 255]));
        let palette = KmeansQuantizer::default().palette(&image, 5);
        assert_eq!(palette, vec![[40, 50, 60]]);

        let empty = solid_image(2, 2, [255, 255, 255, 0]);
        assert!(KmeansQuantizer::default().palette(&empty, 5).is_empty());
    }

    #[test]
    fn test_kmeans_respects_palette_size() {
        let mut image = RgbaImage::new(8, 1);
        for x in 0..8 {
            let v = (x * 32) as u8;
            image.put_pixel(x, 0, image::Rgba([v, v, v, 255]));
        }
        let palette = KmeansQuantizer::default().palette(&image, 3);
        assert!(!palette.is_empty() && palette.len() <= 3);
    }

    #[test]
    fn test_kmeans_flat_image_reports_exact_colour() {
        let image = solid_image(16, 16, [30, 60, 90, 255]);
        assert_eq!(
            KmeansQuantizer::default().palette(&image, 5),
            vec![[30, 60, 90]]
        );
    }

    #[test]
    fn test_representative_colour_weights_dominant() {
        let palette = [[100, 0, 0], [0, 100, 0]];
        let colour = representative_colour(&palette).unwrap();
        // 0.8 * dominant + 0.2 * mean(50, 50, 0)
        assert!((colour.r - 90.0).abs() < 1e-3);
        assert!((colour.g - 10.0).abs() < 1e-3);
        assert!(colour.b.abs() < 1e-3);
        assert!(colour.is_opaque());
    }

    #[test]
    fn test_representative_colour_single_and_empty() {
        let single = representative_colour(&[[12, 34, 56]]).unwrap();
        assert_eq!(single.to_rgb8(), [12, 34, 56]);
        assert_eq!(representative_colour(&[]), None);
    }

    #[test]
    fn test_parse_css_url() {
        assert_eq!(parse_css_url("url(\"img/bg.png\")"), Some("img/bg.png"));
        assert_eq!(parse_css_url("url('bg.png')"), Some("bg.png"));
        assert_eq!(parse_css_url(" url( bg.png ) "), Some("bg.png"));
        assert_eq!(parse_css_url("none"), None);
        assert_eq!(parse_css_url("url(\"\")"), None);
        assert_eq!(parse_css_url("linear-gradient(red, blue)"), None);
    }

    #[test]
    fn test_parse_css_url_takes_first_url_layer() {
        assert_eq!(
            parse_css_url("url(\"a.png\"), linear-gradient(red, blue)"),
            Some("a.png")
        );
        assert_eq!(
            parse_css_url("linear-gradient(rgba(0, 0, 0, 0.5), red), url(\"b.png\")"),
            Some("b.png")
        );
        assert_eq!(
            parse_css_url("url(\"a.png\"), url(\"b.png\")"),
            Some("a.png")
        );
        assert_eq!(parse_css_url("url(\"a,b.png\"), none"), Some("a,b.png"));
        assert_eq!(parse_css_url("none, none"), None);
    }

    #[test]
    fn test_find_image_ancestors_dedupes_and_skips_no_repeat() {
        let mut doc = FakeDocument::default();
        let page = doc.add(None, &[(StyleProperty::BackgroundImage, "url(\"page.png\")")]);
        let bullet = doc.add(
            Some(page),
            &[
                (StyleProperty::BackgroundImage, "url(\"bullet.png\")"),
                (StyleProperty::BackgroundRepeat, "no-repeat"),
            ],
        );
        let banner = doc.add(Some(page), &[(StyleProperty::BackgroundImage, "url(banner.png)")]);
        let a = doc.add(Some(bullet), &[]);
        let b = doc.add(Some(banner), &[]);
        let c = doc.add(Some(banner), &[]);

        let found = find_image_ancestors(&doc, &doc, &[a, b, c]);
        let expected: Vec<(usize, String)> =
            vec![(page, "page.png".to_owned()), (banner, "banner.png".to_owned())];
        assert_eq!(found.into_iter().collect::<Vec<_>>(), expected);
        // The banner is inspected once even though two elements sit inside it.
        assert_eq!(doc.read_count(banner, StyleProperty::BackgroundImage), 1);
    }

    #[tokio::test]
    async fn test_seed_caches_by_declaring_element() {
        let source = MemorySource {
            images: [("bg.png".to_owned(), solid_image(3, 3, [30, 60, 90, 255]))]
                .into_iter()
                .collect(),
        };
        let quantizer = KmeansQuantizer::default();
        let resolver = ImageColourResolver::new(&source, &quantizer, 5, Duration::from_secs(3));

        let mut cache = BackgroundCache::new();
        let targets: IndexMap<usize, String> =
            [(7, "bg.png".to_owned()), (9, "missing.png".to_owned())]
                .into_iter()
                .collect();
        let report = resolver.seed(targets, &mut cache).await;

        assert_eq!(
            report,
            SeedReport {
                resolved: 1,
                failed: 1,
                abandoned: 0
            }
        );
        assert_eq!(cache.get(7), Some(Colour::rgb(30.0, 60.0, 90.0)));
        assert!(!cache.contains(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_abandons_images_after_deadline() {
        let source = MemorySource {
            images: [("fast.png".to_owned(), solid_image(1, 1, [1, 2, 3, 255]))]
                .into_iter()
                .collect(),
        };
        let quantizer = KmeansQuantizer::default();
        let resolver =
            ImageColourResolver::new(&source, &quantizer, 5, Duration::from_millis(3000));

        let mut cache = BackgroundCache::new();
        let targets: IndexMap<usize, String> =
            [(1, "slow.png".to_owned()), (2, "fast.png".to_owned())]
                .into_iter()
                .collect();
        let report = resolver.seed(targets, &mut cache).await;

        assert_eq!(report.resolved, 1);
        assert_eq!(report.abandoned, 1);
        assert!(cache.contains(2));
        assert!(!cache.contains(1));
    }

    /// Stalls its thread, standing in for a huge image.
    #[derive(Clone)]
    struct StallingQuantizer(Duration);

    impl Quantizer for StallingQuantizer {
        fn palette(&self, _image: &RgbaImage, _size: usize) -> Vec<[u8; 3]> {
            std::thread::sleep(self.0);
            vec![[0, 0, 0]]
        }
    }

    #[tokio::test]
    async fn test_deadline_fires_while_quantizing() {
        let source = MemorySource {
            images: [("huge.png".to_owned(), solid_image(1, 1, [1, 2, 3, 255]))]
                .into_iter()
                .collect(),
        };
        let quantizer = StallingQuantizer(Duration::from_millis(1500));
        let resolver =
            ImageColourResolver::new(&source, &quantizer, 5, Duration::from_millis(50));

        let mut cache = BackgroundCache::new();
        let targets: IndexMap<usize, String> =
            [(1, "huge.png".to_owned())].into_iter().collect();
        let started = std::time::Instant::now();
        let report = resolver.seed(targets, &mut cache).await;

        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(report.abandoned, 1);
        assert!(!cache.contains(1));
    }

    #[tokio::test]
    async fn test_file_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        solid_image(2, 2, [10, 200, 30, 255])
            .save(dir.path().join("tile.png"))
            .unwrap();

        let source = FileImageSource::new(dir.path());
        let image = source.load("tile.png").await.unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [10, 200, 30, 255]);

        assert!(matches!(
            source.load("absent.png").await,
            Err(ImageError::Io { .. })
        ));
        assert!(matches!(
            source.load("https://example.com/a.png").await,
            Err(ImageError::UnsupportedUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), [0, 1, 2, 3]).unwrap();
        let source = FileImageSource::new(dir.path());
        assert!(matches!(
            source.load("broken.png").await,
            Err(ImageError::Decode(_))
        ));
    }
}
