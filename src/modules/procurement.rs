use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::modules::config::BuildConfig;
use crate::modules::error::Result;
use crate::modules::materials::{
    MaterialClass, classify, help_suggestion, is_kept_when_decluttering, is_non_critical,
    should_use_direct_collection, substitutes,
};
use crate::modules::state::PauseReason;
use crate::modules::world::{Bot, ContainerInfo, Inventory, Vec3, held};

/// Recipe levels resolved below the requested item.
pub const MAX_CRAFT_DEPTH: u32 = 4;

/// The agent walks back when procurement left it further than this away.
pub const RETURN_TOLERANCE: f64 = 3.0;

/// Where the blocks for one material are coming from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialNeed {
    pub required: u32,
    pub in_inventory: u32,
    pub in_storage: u32,
    pub missing: u32,
}

pub type MaterialAnalysis = BTreeMap<String, MaterialNeed>;

/// Split each requirement into held, stored and missing counts. Inventory is
/// counted first, storage second, each capped at what is still needed.
pub fn analyze(
    required: &BTreeMap<String, u32>,
    inventory: &Inventory,
    storage: &[ContainerInfo],
) -> MaterialAnalysis {
    required
        .iter()
        .map(|(name, &count)| {
            let in_inventory = held(inventory, name).min(count);
            let stored: u32 = storage
                .iter()
                .map(|c| c.contents.get(name).copied().unwrap_or(0))
                .sum();
            let in_storage = stored.min(count - in_inventory);
            let need = MaterialNeed {
                required: count,
                in_inventory,
                in_storage,
                missing: count - in_inventory - in_storage,
            };
            (name.clone(), need)
        })
        .collect()
}

/// Materials the inventory does not cover, with the shortfall.
pub fn missing_materials(
    required: &BTreeMap<String, u32>,
    inventory: &Inventory,
) -> BTreeMap<String, u32> {
    required
        .iter()
        .filter_map(|(name, &count)| {
            let have = held(inventory, name);
            (have < count).then(|| (name.clone(), count - have))
        })
        .collect()
}

/// A layer's materials are in hand. Substituted materials map to the held
/// item placed instead; skipped ones are left out of the layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Procured {
    pub substitutions: BTreeMap<String, String>,
    pub skipped: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcurementOutcome {
    Satisfied(Procured),
    Failed {
        reason: PauseReason,
        material: String,
        count: u32,
        message: String,
    },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct Procurer {
    bot: Arc<dyn Bot>,
    config: BuildConfig,
}

impl Procurer {
    pub fn new(bot: Arc<dyn Bot>, config: BuildConfig) -> Self {
        Self { bot, config }
    }

    /// Account for `required` against inventory and nearby storage without
    /// moving anything.
    pub async fn analyze(&self, required: &BTreeMap<String, u32>) -> Result<MaterialAnalysis> {
        let storage = self.bot.nearby_containers(self.config.storage_radius).await?;
        Ok(analyze(required, &self.bot.inventory(), &storage))
    }

    /// Get every material in `required` into the inventory, or explain why
    /// not. `retries` persists across calls for the same build.
    pub async fn procure(
        &self,
        required: &BTreeMap<String, u32>,
        return_to: Option<Vec3>,
        retries: &mut BTreeMap<String, u32>,
    ) -> ProcurementOutcome {
        let outcome = self.gather(required, retries).await;
        if let Some(home) = return_to {
            if self.bot.position().distance(home) > RETURN_TOLERANCE {
                if let Err(err) = self.bot.navigate_to(home, 1.0).await {
                    warn!(error = %err, "could not return to the build site");
                }
            }
        }
        outcome
    }

    async fn gather(
        &self,
        required: &BTreeMap<String, u32>,
        retries: &mut BTreeMap<String, u32>,
    ) -> ProcurementOutcome {
        let containers = match self.bot.nearby_containers(self.config.storage_radius).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "container scan failed; continuing without storage");
                Vec::new()
            }
        };

        self.declutter(required, &containers).await;
        self.withdraw(required, &containers).await;

        let mut procured = Procured::default();
        let mut missing = missing_materials(required, &self.bot.inventory());
        self.substitute_or_skip(required, &mut missing, &mut procured);

        for (material, shortfall) in &missing {
            info!(material = %material, shortfall, "procuring");
            let target = required[material];
            if let Some(failed) = self.acquire_with_retries(material, target, retries).await {
                return failed;
            }
        }

        let inventory = self.bot.inventory();
        if let Some((material, count)) = missing
            .keys()
            .filter_map(|m| {
                let have = held(&inventory, m);
                (have < required[m]).then(|| (m.clone(), required[m] - have))
            })
            .next()
        {
            return ProcurementOutcome::Failed {
                reason: PauseReason::MaterialGatheringFailed,
                message: format!("still short of {} {}", count, material),
                material,
                count,
            };
        }

        ProcurementOutcome::Satisfied(procured)
    }

    /// Stash everything that is neither gear nor needed here.
    async fn declutter(&self, required: &BTreeMap<String, u32>, containers: &[ContainerInfo]) {
        let Some(chest) = containers.first() else {
            return;
        };
        let mut stored = 0;
        for (item, count) in self.bot.inventory() {
            if is_kept_when_decluttering(&item) || required.contains_key(&item) {
                continue;
            }
            match self.bot.deposit(chest.position, &item, count).await {
                Ok(moved) => stored += moved,
                Err(err) => warn!(item = %item, error = %err, "deposit failed"),
            }
        }
        if stored > 0 {
            info!(stored, container = %chest.position, "decluttered inventory");
        }
    }

    async fn withdraw(&self, required: &BTreeMap<String, u32>, containers: &[ContainerInfo]) {
        let mut missing = missing_materials(required, &self.bot.inventory());
        for container in containers {
            for (material, remaining) in missing.iter_mut() {
                let available = container.contents.get(material).copied().unwrap_or(0);
                let want = (*remaining).min(available);
                if want == 0 {
                    continue;
                }
                match self.bot.withdraw(container.position, material, want).await {
                    Ok(moved) => {
                        debug!(
                            material = %material,
                            moved,
                            container = %container.position,
                            "withdrew"
                        );
                        *remaining -= moved.min(*remaining);
                    }
                    Err(err) => warn!(material = %material, error = %err, "withdraw failed"),
                }
            }
        }
    }

    fn substitute_or_skip(
        &self,
        required: &BTreeMap<String, u32>,
        missing: &mut BTreeMap<String, u32>,
        procured: &mut Procured,
    ) {
        let inventory = self.bot.inventory();
        let mut reserved: BTreeMap<String, u32> = required.clone();

        missing.retain(|material, _| {
            let need = required[material];
            for candidate in substitutes(material) {
                let spare = held(&inventory, &candidate)
                    .saturating_sub(reserved.get(&candidate).copied().unwrap_or(0));
                if spare >= need {
                    info!(material = %material, substitute = %candidate, "using substitute");
                    *reserved.entry(candidate.clone()).or_insert(0) += need;
                    procured.substitutions.insert(material.clone(), candidate);
                    return false;
                }
            }
            if is_non_critical(material) {
                info!(material = %material, "skipping non-critical material");
                procured.skipped.insert(material.clone());
                return false;
            }
            true
        });
    }

    /// Retry one material until it is held or must be escalated. `None`
    /// means the material is now in the inventory.
    async fn acquire_with_retries(
        &self,
        material: &str,
        target: u32,
        retries: &mut BTreeMap<String, u32>,
    ) -> Option<ProcurementOutcome> {
        loop {
            let have = held(&self.bot.inventory(), material);
            if have >= target {
                retries.remove(material);
                return None;
            }
            let short = target - have;

            let attempts = retries.get(material).copied().unwrap_or(0);
            if classify(material) == MaterialClass::Difficult
                || attempts >= self.config.max_material_retries
            {
                let message = format!("need {} {}; {}", short, material, help_suggestion(material));
                warn!(material, short, attempts, "waiting for help");
                return Some(ProcurementOutcome::Failed {
                    reason: PauseReason::WaitingForHelp,
                    material: material.to_string(),
                    count: short,
                    message,
                });
            }

            match self.acquire(material, short).await {
                Ok(true) if held(&self.bot.inventory(), material) >= target => {
                    retries.remove(material);
                    return None;
                }
                Ok(_) => {
                    let count = retries.entry(material.to_string()).or_insert(0);
                    *count += 1;
                    debug!(material, attempt = *count, "procurement attempt failed");
                }
                Err(err) => {
                    warn!(material, error = %err, "procurement skill failed");
                    return Some(ProcurementOutcome::Failed {
                        reason: PauseReason::MaterialGatheringFailed,
                        material: material.to_string(),
                        count: short,
                        message: format!("gathering {} failed: {}", material, err),
                    });
                }
            }
        }
    }

    async fn acquire(&self, material: &str, count: u32) -> Result<bool> {
        match classify(material) {
            MaterialClass::Base => self.bot.collect(material, count).await,
            MaterialClass::SimpleCraft => {
                if self.bot.collect(material, count).await? {
                    return Ok(true);
                }
                self.craft_with_ingredients(material, count, 0).await
            }
            MaterialClass::ComplexCraft => self.craft_with_ingredients(material, count, 0).await,
            MaterialClass::Difficult => Ok(false),
        }
    }

    /// Craft `count` of `item`, first collecting or crafting any ingredient
    /// the inventory lacks.
    fn craft_with_ingredients<'a>(
        &'a self,
        item: &'a str,
        count: u32,
        depth: u32,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if depth > MAX_CRAFT_DEPTH {
                debug!(item, "recipe chain too deep");
                return Ok(false);
            }
            let Some(recipe) = self.bot.recipe(item) else {
                return Ok(false);
            };
            let batches = count.div_ceil(recipe.yields.max(1));

            for (ingredient, per_batch) in &recipe.ingredients {
                let need = per_batch * batches;
                let have = held(&self.bot.inventory(), ingredient);
                if have >= need {
                    continue;
                }
                let short = need - have;
                let collected = should_use_direct_collection(ingredient)
                    && self.bot.collect(ingredient, short).await?;
                if !collected && !self.craft_with_ingredients(ingredient, short, depth + 1).await? {
                    return Ok(false);
                }
            }
            self.bot.craft(item, count).await
        })
    }
}
