//! Stats cards. A card is planned as a plain [`UserCardLayout`] /
//! [`CharacterCardLayout`] first and rasterized second; rasterizing only
//! reads sprites that are already on disk.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::assets::{Asset, AssetStore, Category};
use crate::cache::Envelope;
use crate::error::Result;
use crate::genshin::{CharacterDetail, UserStats, region_label};

/// Portraits per page row.
pub const PAGE_WIDTH: usize = 7;

const WIDTH: u32 = 1400;
const HEADER_H: u32 = 360;
const PAGE_H: u32 = 200;
const FOOTER_H: u32 = 60;
const GRID_X: u32 = 110;
const PORTRAIT: u32 = 150;
const PORTRAIT_STEP: u32 = 180;
const TRAVELER: u32 = 180;
const EXPLORATION_ROWS: usize = 10;
const BAR_W: u32 = 600;

const ART_W: u32 = 720;
const ART_H: u32 = 1000;
const TILE: u32 = 80;

const INK: u32 = 0x263238;
const PANEL: u32 = 0xF5F0E6;
const PLACEHOLDER: u32 = 0xB3B3B3;
const STAR: u32 = 0xFFD942;

static ELEMENT: phf::Map<&'static str, u32> = phf::phf_map! {
    "Anemo" => 0x3C8B6D,
    "Cryo" => 0x5C9DAB,
    "Dendro" => 0x789B34,
    "Electro" => 0x946FAE,
    "Geo" => 0xA39982,
    "Hydro" => 0x2A8AA9,
    "Pyro" => 0xB07451,
};

static ELEMENT_BACKGROUND: phf::Map<&'static str, u32> = phf::phf_map! {
    "Anemo" => 0xC7DDD5,
    "Cryo" => 0xC0E7F2,
    "Dendro" => 0xB4E84E,
    "Electro" => 0xD0CCE1,
    "Geo" => 0xF0E1C0,
    "Hydro" => 0xC5D7E3,
    "Pyro" => 0xECC5C3,
};

fn rgb(hex: u32) -> Rgba<u8> {
    Rgba([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8, 255])
}

fn element_colour(element: &str) -> u32 {
    ELEMENT.get(element).copied().unwrap_or(PLACEHOLDER)
}

fn rarity_colour(rarity: u8) -> u32 {
    match rarity {
        5.. => 0xFFB13F,
        4 => 0xA256E1,
        _ => 0x8A8A8A,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Portrait {
    pub asset: Asset,
    pub x: u32,
    pub y: u32,
    pub rarity: u8,
    pub constellation: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub name: String,
    pub permille: u32,
    pub level: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserCardLayout {
    pub uid: u64,
    pub region: &'static str,
    pub counters: Vec<(&'static str, String)>,
    pub explorations: Vec<Bar>,
    pub home: Option<(u32, String)>,
    pub traveler: Option<Asset>,
    /// rows of at most [`PAGE_WIDTH`] portraits, in upstream order
    pub pages: Vec<Vec<Portrait>>,
    pub width: u32,
    pub height: u32,
}

impl UserCardLayout {
    pub fn plan(uid: u64, stats: &UserStats) -> Self {
        let pages: Vec<Vec<Portrait>> = stats
            .characters
            .chunks(PAGE_WIDTH)
            .enumerate()
            .map(|(row, chunk)| {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(col, c)| Portrait {
                        asset: c.avatar(),
                        x: GRID_X + col as u32 * PORTRAIT_STEP,
                        y: HEADER_H + row as u32 * PAGE_H + 10,
                        rarity: c.rarity,
                        constellation: c.constellation,
                    })
                    .collect()
            })
            .collect();
        let c = &stats.chests;
        let o = &stats.oculi;
        Self {
            uid,
            region: region_label(uid),
            counters: vec![
                ("days active", stats.days_active.to_string()),
                ("achievements", stats.achievements.to_string()),
                ("characters", stats.characters_count.to_string()),
                ("spiral abyss", stats.spiral_abyss.clone()),
                ("common chests", c.common.to_string()),
                ("exquisite chests", c.exquisite.to_string()),
                ("precious chests", c.precious.to_string()),
                ("luxurious chests", c.luxurious.to_string()),
                ("anemoculi", o.anemo.to_string()),
                ("geoculi", o.geo.to_string()),
                ("electroculi", o.electro.to_string()),
            ],
            explorations: stats
                .explorations
                .iter()
                .take(EXPLORATION_ROWS)
                .map(|e| Bar {
                    name: e.name.clone(),
                    permille: e.permille.min(1000),
                    level: e.level,
                })
                .collect(),
            home: stats.home.as_ref().map(|h| (h.comfort, h.comfort_name.clone())),
            traveler: stats.traveler().map(|t| t.avatar()),
            height: HEADER_H + pages.len() as u32 * PAGE_H + FOOTER_H,
            width: WIDTH,
            pages,
        }
    }

    /// Text that goes with the image.
    pub fn caption(&self) -> String {
        let mut s = format!("UID {}", self.uid);
        if !self.region.is_empty() {
            s.push_str(&format!(" · {}", self.region));
        }
        for (k, v) in &self.counters {
            s.push_str(&format!("\n{k}: **{v}**"));
        }
        for b in &self.explorations {
            s.push_str(&format!("\n{}: {}% Lv.{}", b.name, b.permille as f32 / 10.0, b.level));
        }
        if let Some((comfort, name)) = &self.home {
            s.push_str(&format!("\nserenitea pot: {comfort} ({name})"));
        }
        s
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub asset: Asset,
    pub x: u32,
    pub y: u32,
    pub rarity: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CharacterCardLayout {
    pub uid: u64,
    pub element: String,
    pub frame: u32,
    pub background: u32,
    pub art: Asset,
    pub weapon: Tile,
    /// ordered by slot
    pub artifacts: Vec<Tile>,
    pub rarity: u8,
    pub constellation: u8,
    pub width: u32,
    pub height: u32,
    caption: String,
}

impl CharacterCardLayout {
    pub fn plan(uid: u64, c: &CharacterDetail) -> Self {
        let mut artifacts = c.artifacts.clone();
        artifacts.sort_by_key(|a| a.pos);
        let w = &c.weapon;
        let mut caption = format!(
            "UID.{uid} · **{}** {} Lv.{} · C{} · friendship {}\n{} Lv.{} R{}",
            c.name,
            "★".repeat(c.rarity as usize),
            c.level,
            c.constellation,
            c.friendship,
            w.name,
            w.level,
            w.refinement,
        );
        for a in &artifacts {
            caption.push_str(&format!("\n{} +{}", a.name, a.level));
        }
        Self {
            uid,
            element: c.element.clone(),
            frame: element_colour(&c.element),
            background: ELEMENT_BACKGROUND.get(c.element.as_str()).copied().unwrap_or(PLACEHOLDER),
            art: c.art(),
            weapon: Tile {
                asset: Asset::new(Category::Weapon, w.id),
                x: 120,
                y: 360,
                rarity: w.rarity,
            },
            artifacts: artifacts
                .iter()
                .enumerate()
                .map(|(i, a)| Tile {
                    asset: Asset::new(Category::Artifact, a.id),
                    x: 120,
                    y: 480 + i as u32 * 100,
                    rarity: a.rarity,
                })
                .collect(),
            rarity: c.rarity,
            constellation: c.constellation,
            width: ART_W + 240,
            height: ART_H + 60,
            caption,
        }
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }
}

/// Encoded card plus the sprites it had to stand in for.
#[derive(Debug)]
pub struct Card {
    pub png: Vec<u8>,
    pub caption: String,
    pub missing: Vec<Asset>,
}

struct Canvas<'a> {
    img: RgbaImage,
    store: &'a AssetStore,
    missing: Vec<Asset>,
}

impl<'a> Canvas<'a> {
    fn new(store: &'a AssetStore, width: u32, height: u32, bg: u32) -> Self {
        Self {
            img: RgbaImage::from_pixel(width, height, rgb(bg)),
            store,
            missing: vec![],
        }
    }

    fn fill(&mut self, x: u32, y: u32, w: u32, h: u32, colour: u32) {
        if w == 0 || h == 0 {
            return;
        }
        let block = RgbaImage::from_pixel(w, h, rgb(colour));
        imageops::overlay(&mut self.img, &block, x.into(), y.into());
    }

    fn load(&mut self, asset: Asset) -> Option<image::DynamicImage> {
        if self.store.has(asset) {
            match image::open(self.store.path_for(asset)) {
                Ok(i) => return Some(i),
                Err(e) => warn!(%asset, error = %e, "unreadable sprite"),
            }
        }
        if !self.missing.contains(&asset) {
            self.missing.push(asset);
        }
        None
    }

    /// Sprite stretched into the box, or a placeholder block.
    fn sprite(&mut self, asset: Asset, x: u32, y: u32, w: u32, h: u32) {
        match self.load(asset) {
            Some(i) => {
                let i = imageops::resize(&i.to_rgba8(), w, h, FilterType::Triangle);
                imageops::overlay(&mut self.img, &i, x.into(), y.into());
            }
            None => self.fill(x, y, w, h, PLACEHOLDER),
        }
    }

    /// Sprite scaled to fit the box keeping its aspect ratio.
    fn fit(&mut self, asset: Asset, x: u32, y: u32, w: u32, h: u32) {
        match self.load(asset) {
            Some(i) => {
                let i = i.resize(w, h, FilterType::Triangle).to_rgba8();
                imageops::overlay(&mut self.img, &i, x.into(), y.into());
            }
            None => self.fill(x, y, w, h, PLACEHOLDER),
        }
    }

    fn stars(&mut self, x: u32, y: u32, n: u8, size: u32) {
        for i in 0..n as u32 {
            self.fill(x + i * (size + 2), y, size, size, STAR);
        }
    }

    fn finish(self, caption: String) -> Result<Card> {
        Ok(Card {
            png: png(self.img)?,
            caption,
            missing: self.missing,
        })
    }
}

pub fn compose_user_card(uid: u64, stats: &UserStats, store: &AssetStore) -> Result<Card> {
    let layout = UserCardLayout::plan(uid, stats);
    let mut c = Canvas::new(store, layout.width, layout.height, PANEL);

    // header
    c.fill(0, 0, layout.width, 8, INK);
    if let Some(t) = layout.traveler {
        c.sprite(t, 90, 60, TRAVELER, TRAVELER);
    }
    for (i, bar) in layout.explorations.iter().enumerate() {
        let y = 60 + i as u32 * 28;
        c.fill(320, y, BAR_W, 18, 0xD8D2C4);
        c.fill(320, y, BAR_W * bar.permille / 1000, 18, 0x6B9E78);
    }
    if let Some((comfort, _)) = &layout.home {
        // 20000 comfort is the highest tier
        c.fill(960, 60, 18, 240, 0xD8D2C4);
        let h = 240 * (*comfort).min(20000) / 20000;
        c.fill(960, 60 + 240 - h, 18, h, 0xC99A4E);
    }

    // portraits
    for p in layout.pages.iter().flatten() {
        c.fill(p.x - 4, p.y - 4, PORTRAIT + 8, PORTRAIT + 8, rarity_colour(p.rarity));
        c.sprite(p.asset, p.x, p.y, PORTRAIT, PORTRAIT);
        for k in 0..p.constellation.min(6) as u32 {
            c.fill(p.x + k * 24, p.y + PORTRAIT + 10, 18, 8, 0x9575CD);
        }
    }

    // footer
    c.fill(0, layout.height - FOOTER_H, layout.width, FOOTER_H, INK);
    debug!(uid, pages = layout.pages.len(), missing = c.missing.len(), "user card composed");
    c.finish(layout.caption())
}

pub fn compose_character_card(uid: u64, detail: &CharacterDetail, store: &AssetStore) -> Result<Card> {
    let layout = CharacterCardLayout::plan(uid, detail);
    let mut c = Canvas::new(store, layout.width, layout.height, layout.frame);
    c.fill(20, 20, layout.width - 40, layout.height - 40, layout.background);
    c.fit(layout.art, 200, 40, ART_W, ART_H);

    let icon = store.static_path("elements", &layout.element);
    match image::open(&icon) {
        Ok(i) => {
            let i = imageops::resize(&i.to_rgba8(), 64, 64, FilterType::Triangle);
            imageops::overlay(&mut c.img, &i, 40, 40);
        }
        Err(e) => debug!(path = %icon.display(), error = %e, "no element icon"),
    }
    c.stars(120, 40, layout.rarity, 28);
    for k in 0..layout.constellation.min(6) as u32 {
        c.fill(120 + k * 30, 170, 22, 22, layout.frame);
    }

    for t in std::iter::once(&layout.weapon).chain(&layout.artifacts) {
        c.fill(t.x, t.y, TILE, TILE, layout.frame);
        c.sprite(t.asset, t.x, t.y, TILE, TILE);
        let w = t.rarity as u32 * 12;
        c.stars(t.x + (TILE.saturating_sub(w)) / 2, t.y + TILE - 12, t.rarity, 10);
    }
    debug!(uid, id = detail.id, missing = c.missing.len(), "character card composed");
    let caption = layout.caption().to_string();
    c.finish(caption)
}

pub fn png(p: RgbaImage) -> Result<Vec<u8>> {
    use oxipng::*;
    let p = RawImage::new(p.width(), p.height(), ColorType::RGBA, BitDepth::Eight, p.into_raw())?;
    Ok(p.create_optimized_png(&oxipng::Options {
        filter: indexset! { RowFilter::None },
        bit_depth_reduction: false,
        color_type_reduction: false,
        palette_reduction: false,
        grayscale_reduction: false,
        ..oxipng::Options::from_preset(0)
    })?)
}

/// Runs composition on the blocking pool, at most `workers` at a time.
pub struct Composer {
    store: Arc<AssetStore>,
    permits: Semaphore,
}

impl Composer {
    pub fn new(store: Arc<AssetStore>, workers: usize) -> Self {
        Self {
            store,
            permits: Semaphore::new(workers.max(1)),
        }
    }

    pub async fn user_card(&self, uid: u64, stats: Arc<Envelope<UserStats>>) -> Result<Card> {
        let _permit = self.permits.acquire().await?;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || compose_user_card(uid, &stats.data, &store)).await?
    }

    pub async fn character_card(&self, uid: u64, detail: Arc<Envelope<CharacterDetail>>) -> Result<Card> {
        let _permit = self.permits.acquire().await?;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || compose_character_card(uid, &detail.data, &store)).await?
    }
}
