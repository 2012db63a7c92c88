//! Genre seeds for phase1 diversity.

use gamegen_core::Job;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::HashSet;

/// Catalog of genre tags handed to phase1.
pub const GENRE_SEEDS: [&str; 16] = [
    "dungeon-crawler",
    "space-combat",
    "fishing-and-gathering",
    "factory-automation",
    "monster-tamer",
    "lane-battle",
    "tower-defense",
    "wave-survival",
    "exploration-and-mapping",
    "racing-and-dodging",
    "farming-and-ecosystem",
    "puzzle-combat",
    "pirate-ship-battles",
    "spell-crafting-arena",
    "train-network",
    "underwater-exploration",
];

/// Pick a genre not seeded by any of `recent`, falling back to the whole
/// catalog once every genre has been used.
pub fn choose_genre<R: Rng + ?Sized>(recent: &[Job], rng: &mut R) -> &'static str {
    let used: HashSet<&str> = recent
        .iter()
        .filter_map(|job| job.phase_outputs.genre_seed())
        .collect();

    let available: Vec<&'static str> = GENRE_SEEDS
        .iter()
        .copied()
        .filter(|genre| !used.contains(genre))
        .collect();

    let pool: &[&'static str] = if available.is_empty() {
        &GENRE_SEEDS
    } else {
        &available
    };
    pool.choose(rng).copied().unwrap_or(GENRE_SEEDS[0])
}
