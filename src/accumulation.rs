//! Double-buffered running average of per-frame samples.
//!
//! Each frame reads the "current" slot as history, writes the blended result into
//! the "next" slot and then flips the roles. A slot is never read and written in
//! the same pass.

use glam::Vec4;
use log::warn;

use crate::backend::{BlitOp, RayTracingBackend};

/// Incremental-mean coefficient for the sample at `sample_index`.
pub fn blend_weight(sample_index: u32) -> f32 {
    1.0 / (sample_index as f32 + 1.0)
}

/// Blends one pixel. A weight of one returns `raw` bit for bit, whatever `prior` holds.
pub fn blend_pixel(prior: Vec4, raw: Vec4, weight: f32) -> Vec4 {
    if weight >= 1.0 {
        raw
    } else {
        prior * (1.0 - weight) + raw * weight
    }
}

/// Number of samples accumulated since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleCounter(u32);

impl SampleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn weight(self) -> f32 {
        blend_weight(self.0)
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn advance(&mut self) {
        self.0 = self.0.saturating_add(1);
    }
}

/// Which of the two slots a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    Current,
    Next,
}

/// Two accumulation images whose roles alternate every frame.
#[derive(Debug)]
pub struct AccumulationPair<I> {
    slots: [I; 2],
    current: usize,
    swap_pending: bool,
}

impl<I> AccumulationPair<I> {
    /// `current` starts as the history slot, `next` as the write target.
    pub fn new(current: I, next: I) -> Self {
        Self {
            slots: [current, next],
            current: 0,
            swap_pending: false,
        }
    }

    /// Slot holding valid accumulated history. The only slot that may be presented.
    pub fn current(&self) -> &I {
        &self.slots[self.current]
    }

    /// Slot written by the next blend.
    pub fn next(&self) -> &I {
        &self.slots[self.current ^ 1]
    }

    pub fn slot(&self, role: SlotRole) -> &I {
        match role {
            SlotRole::Current => self.current(),
            SlotRole::Next => self.next(),
        }
    }

    /// Blends `raw` into the next slot using `current` as history and returns the
    /// freshly written slot. Call [`swap`](Self::swap) before presenting.
    pub fn blend<B>(&mut self, backend: &mut B, raw: &I, sample_index: u32) -> &I
    where
        B: RayTracingBackend<Image = I>,
    {
        if self.swap_pending {
            warn!("accumulation blended twice without a swap; overwriting next slot");
        }
        let weight = blend_weight(sample_index);
        backend.blit(
            raw,
            self.next(),
            BlitOp::Accumulate {
                history: self.current(),
                weight,
            },
        );
        self.swap_pending = true;
        self.next()
    }

    /// Exchanges the slot roles without touching pixel data.
    pub fn swap(&mut self) {
        self.current ^= 1;
        self.swap_pending = false;
    }

    pub fn swap_pending(&self) -> bool {
        self.swap_pending
    }

    /// Gives back both slots, current first.
    pub fn into_slots(self) -> [I; 2] {
        let [a, b] = self.slots;
        if self.current == 0 {
            [a, b]
        } else {
            [b, a]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, CpuImage, ImageFormat};
    use crate::camera::Viewport;

    #[test]
    fn weight_formula() {
        assert_eq!(blend_weight(0), 1.0);
        for k in 0..=1000u32 {
            assert_eq!(blend_weight(k), 1.0 / (k as f32 + 1.0));
        }
    }

    #[test]
    fn first_sample_replaces_history_exactly() {
        let prior = Vec4::new(f32::NAN, 5.0, -3.0, f32::INFINITY);
        let raw = Vec4::new(0.1, 0.2, 0.3, 1.0);
        assert_eq!(blend_pixel(prior, raw, blend_weight(0)), raw);
    }

    #[test]
    fn counter_resets_and_saturates() {
        let mut counter = SampleCounter::new();
        counter.advance();
        counter.advance();
        assert_eq!(counter.value(), 2);
        assert!((counter.weight() - 1.0 / 3.0).abs() < 1e-7);
        counter.reset();
        assert_eq!(counter.value(), 0);
        let mut full = SampleCounter(u32::MAX);
        full.advance();
        assert_eq!(full.value(), u32::MAX);
    }

    fn pair_on(backend: &mut CpuBackend, viewport: Viewport) -> (CpuImage, AccumulationPair<CpuImage>) {
        let format = ImageFormat::Rgba32Float;
        let raw = backend.create_image(viewport, format, "raw").unwrap();
        let a = backend.create_image(viewport, format, "a").unwrap();
        let b = backend.create_image(viewport, format, "b").unwrap();
        (raw, AccumulationPair::new(a, b))
    }

    #[test]
    fn swap_keeps_latest_blend_current() {
        let mut backend = CpuBackend::new();
        let (raw, mut pair) = pair_on(&mut backend, Viewport::new(1, 1));
        let mut previous: Option<Vec4> = None;
        for tag in 1..=5 {
            let value = Vec4::splat(tag as f32);
            backend.fill(&raw, value);
            let written = pair.blend(&mut backend, &raw, 0).clone();
            pair.swap();
            assert_eq!(pair.current(), &written);
            assert_eq!(backend.pixels(pair.current()).unwrap()[0], value);
            if let Some(previous) = previous {
                assert_eq!(backend.pixels(pair.next()).unwrap()[0], previous);
            }
            previous = Some(value);
        }
    }

    #[test]
    fn running_average_converges_to_mean() {
        let mut backend = CpuBackend::new();
        let (raw, mut pair) = pair_on(&mut backend, Viewport::new(2, 1));
        // Deterministic sequence in [0, 1) with a known mean.
        let samples: Vec<f32> = (0..2000).map(|i| ((i * 7919) % 1000) as f32 / 1000.0).collect();
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        for (index, sample) in samples.iter().enumerate() {
            backend.fill(&raw, Vec4::splat(*sample));
            pair.blend(&mut backend, &raw, index as u32);
            pair.swap();
        }
        let result = backend.pixels(pair.current()).unwrap();
        for pixel in result {
            assert!((pixel.x - mean).abs() < 1e-3, "{} vs {mean}", pixel.x);
        }
    }

    #[test]
    fn blend_never_targets_history() {
        let mut backend = CpuBackend::new();
        let (raw, mut pair) = pair_on(&mut backend, Viewport::new(1, 1));
        let history = pair.current().clone();
        let written = pair.blend(&mut backend, &raw, 3).clone();
        assert_ne!(history, written);
        assert!(pair.swap_pending());
        pair.swap();
        assert!(!pair.swap_pending());
    }

    #[test]
    fn into_slots_orders_current_first() {
        let mut pair = AccumulationPair::new("a", "b");
        pair.swap();
        assert_eq!(pair.slot(SlotRole::Current), &"b");
        assert_eq!(pair.into_slots(), ["b", "a"]);
    }
}
