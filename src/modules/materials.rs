use std::fmt;

use serde::{Deserialize, Serialize};

use crate::modules::block_state::base_name;

/// How a material is expected to be obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialClass {
    /// Mined or picked up directly.
    Base,
    /// Crafted from base materials without special tooling.
    SimpleCraft,
    /// Needs recipe resolution, possibly several levels deep.
    ComplexCraft,
    /// Mob drops or rare finds; not reliably automatable.
    Difficult,
}

impl MaterialClass {
    pub const fn label(self) -> &'static str {
        match self {
            MaterialClass::Base => "base",
            MaterialClass::SimpleCraft => "simple craft",
            MaterialClass::ComplexCraft => "complex craft",
            MaterialClass::Difficult => "difficult",
        }
    }
}

impl fmt::Display for MaterialClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

const BASE: &[&str] = &[
    "dirt",
    "grass_block",
    "coarse_dirt",
    "sand",
    "red_sand",
    "gravel",
    "clay",
    "stone",
    "cobblestone",
    "granite",
    "diorite",
    "andesite",
    "deepslate",
    "cobbled_deepslate",
    "tuff",
    "calcite",
    "netherrack",
    "snow_block",
    "ice",
    "oak_log",
    "spruce_log",
    "birch_log",
    "jungle_log",
    "acacia_log",
    "dark_oak_log",
    "mangrove_log",
    "cherry_log",
    "oak_leaves",
    "spruce_leaves",
    "birch_leaves",
    "coal",
    "raw_iron",
    "raw_copper",
    "flint",
    "sugar_cane",
    "bamboo",
    "cactus",
    "pumpkin",
    "melon",
    "moss_block",
    "mud",
];

const SIMPLE_CRAFT: &[&str] = &[
    "oak_planks",
    "spruce_planks",
    "birch_planks",
    "jungle_planks",
    "acacia_planks",
    "dark_oak_planks",
    "mangrove_planks",
    "cherry_planks",
    "stick",
    "crafting_table",
    "torch",
    "chest",
    "furnace",
    "ladder",
    "oak_slab",
    "oak_stairs",
    "oak_fence",
    "oak_door",
    "oak_trapdoor",
    "spruce_slab",
    "spruce_stairs",
    "spruce_fence",
    "spruce_door",
    "cobblestone_slab",
    "cobblestone_stairs",
    "cobblestone_wall",
    "stone_bricks",
    "stone_slab",
    "stone_brick_stairs",
    "sandstone",
    "smooth_stone",
    "glass",
    "bricks",
    "clay_ball",
    "iron_ingot",
    "copper_ingot",
    "charcoal",
];

const DIFFICULT: &[&str] = &[
    "string",
    "white_wool",
    "leather",
    "feather",
    "slime_ball",
    "ender_pearl",
    "blaze_rod",
    "ghast_tear",
    "gunpowder",
    "bone",
    "spider_eye",
    "honeycomb",
    "prismarine_shard",
    "nether_star",
    "obsidian",
    "diamond",
    "emerald",
    "lapis_lazuli",
    "amethyst_shard",
    "quartz",
    "glowstone_dust",
    "magma_cream",
    "shulker_shell",
    "sea_lantern",
];

/// Classify a material name. Anything unlisted is assumed to need a recipe.
pub fn classify(material: &str) -> MaterialClass {
    let name = base_name(material);
    if BASE.contains(&name) {
        MaterialClass::Base
    } else if SIMPLE_CRAFT.contains(&name) {
        MaterialClass::SimpleCraft
    } else if DIFFICULT.contains(&name) {
        MaterialClass::Difficult
    } else {
        MaterialClass::ComplexCraft
    }
}

pub fn should_use_direct_collection(material: &str) -> bool {
    matches!(
        classify(material),
        MaterialClass::Base | MaterialClass::SimpleCraft
    )
}

const COLORS: &[&str] = &[
    "white",
    "orange",
    "magenta",
    "light_blue",
    "yellow",
    "lime",
    "pink",
    "gray",
    "light_gray",
    "cyan",
    "purple",
    "blue",
    "brown",
    "green",
    "red",
    "black",
];

const WOODS: &[&str] = &[
    "oak", "spruce", "birch", "jungle", "acacia", "dark_oak", "mangrove", "cherry",
];

/// Wood-family suffixes whose variants are visually interchangeable for a build.
const WOOD_SUFFIXES: &[&str] = &[
    "_planks",
    "_log",
    "_slab",
    "_stairs",
    "_fence",
    "_fence_gate",
    "_door",
    "_trapdoor",
    "_button",
    "_pressure_plate",
];

/// Held items that may stand in for `material`, in preference order.
pub fn substitutes(material: &str) -> Vec<String> {
    let name = base_name(material);

    for suffix in ["_bed", "_carpet", "_wool", "_concrete", "_terracotta"] {
        if let Some(color) = name.strip_suffix(suffix) {
            if COLORS.contains(&color) {
                return COLORS
                    .iter()
                    .filter(|c| **c != color)
                    .map(|c| format!("{}{}", c, suffix))
                    .collect();
            }
        }
    }

    for suffix in WOOD_SUFFIXES {
        if let Some(wood) = name.strip_suffix(suffix) {
            if WOODS.contains(&wood) {
                return WOODS
                    .iter()
                    .filter(|w| **w != wood)
                    .map(|w| format!("{}{}", w, suffix))
                    .collect();
            }
        }
    }

    Vec::new()
}

const NON_CRITICAL: &[&str] = &[
    "glass",
    "glass_pane",
    "flower_pot",
    "painting",
    "item_frame",
    "lantern",
    "candle",
    "bookshelf",
    "banner",
];

/// Decorative materials a survival build may leave out rather than stall on.
pub fn is_non_critical(material: &str) -> bool {
    let name = base_name(material);
    NON_CRITICAL.contains(&name)
        || name.ends_with("_stained_glass")
        || name.ends_with("_stained_glass_pane")
        || name.ends_with("_carpet")
        || name.ends_with("_banner")
        || name.starts_with("potted_")
}

const HELP: &[(&str, &str)] = &[
    ("string", "hunt spiders or craft from wool"),
    ("white_wool", "shear sheep or craft from string"),
    ("leather", "kill cows or horses"),
    ("feather", "kill chickens"),
    ("slime_ball", "kill slimes in swamps or slime chunks"),
    ("ender_pearl", "kill endermen or trade with clerics"),
    ("blaze_rod", "kill blazes in a nether fortress"),
    ("gunpowder", "kill creepers"),
    ("bone", "kill skeletons"),
    ("obsidian", "pour water over lava and mine with a diamond pickaxe"),
    ("diamond", "mine deep underground with an iron pickaxe"),
    ("emerald", "trade with villagers"),
    ("quartz", "mine nether quartz ore"),
    ("glowstone_dust", "mine glowstone in the nether"),
];

/// A short hint for a human asked to fetch `material`.
pub fn help_suggestion(material: &str) -> String {
    let name = base_name(material);
    HELP.iter()
        .find(|(m, _)| *m == name)
        .map(|(m, hint)| format!("{}: {}", m, hint))
        .unwrap_or_else(|| format!("{}: please bring some or point me to a source", name))
}

const KEEP_SUFFIXES: &[&str] = &[
    "_pickaxe", "_axe", "_shovel", "_hoe", "_sword", "_helmet", "_chestplate", "_leggings",
    "_boots",
];

const KEEP_ITEMS: &[&str] = &[
    "bow",
    "crossbow",
    "trident",
    "shield",
    "shears",
    "flint_and_steel",
    "fishing_rod",
    "arrow",
    "spectral_arrow",
    "tipped_arrow",
    "bread",
    "apple",
    "golden_apple",
    "carrot",
    "golden_carrot",
    "baked_potato",
    "cookie",
    "melon_slice",
    "pumpkin_pie",
    "mushroom_stew",
    "rabbit_stew",
    "beetroot_soup",
    "dried_kelp",
    "sweet_berries",
];

/// Tools, weapons, armour, ammo and food stay in the inventory when decluttering.
pub fn is_kept_when_decluttering(item: &str) -> bool {
    let name = base_name(item);
    KEEP_ITEMS.contains(&name)
        || name.starts_with("cooked_")
        || KEEP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_lands_in_exactly_one_class() {
        assert_eq!(classify("cobblestone"), MaterialClass::Base);
        assert_eq!(classify("minecraft:oak_planks"), MaterialClass::SimpleCraft);
        assert_eq!(classify("string"), MaterialClass::Difficult);
        assert_eq!(classify("redstone_lamp"), MaterialClass::ComplexCraft);
        for name in BASE.iter().chain(SIMPLE_CRAFT).chain(DIFFICULT) {
            let hits = [BASE, SIMPLE_CRAFT, DIFFICULT]
                .iter()
                .filter(|table| table.contains(name))
                .count();
            assert_eq!(hits, 1, "{name} listed in more than one table");
        }
    }

    #[test]
    fn direct_collection_for_base_and_simple() {
        assert!(should_use_direct_collection("dirt"));
        assert!(should_use_direct_collection("torch"));
        assert!(!should_use_direct_collection("piston"));
        assert!(!should_use_direct_collection("ender_pearl"));
    }

    #[test]
    fn bed_colours_and_wood_variants_substitute() {
        let beds = substitutes("red_bed");
        assert_eq!(beds.len(), COLORS.len() - 1);
        assert!(beds.contains(&"white_bed".to_string()));
        assert!(!beds.contains(&"red_bed".to_string()));

        let planks = substitutes("minecraft:spruce_planks");
        assert_eq!(planks[0], "oak_planks");
        assert!(substitutes("stone").is_empty());
        assert!(substitutes("stone_slab").is_empty());
    }

    #[test]
    fn decorative_blocks_are_non_critical() {
        assert!(is_non_critical("glass_pane"));
        assert!(is_non_critical("red_stained_glass"));
        assert!(is_non_critical("potted_poppy"));
        assert!(!is_non_critical("stone_bricks"));
    }

    #[test]
    fn help_has_specific_and_generic_hints() {
        assert_eq!(help_suggestion("string"), "string: hunt spiders or craft from wool");
        assert!(help_suggestion("heart_of_the_sea").starts_with("heart_of_the_sea:"));
    }

    #[test]
    fn declutter_keeps_gear_and_food() {
        assert!(is_kept_when_decluttering("diamond_pickaxe"));
        assert!(is_kept_when_decluttering("cooked_beef"));
        assert!(is_kept_when_decluttering("arrow"));
        assert!(!is_kept_when_decluttering("dirt"));
    }
}
