//! Process-wide lifecycle of the one loaded classifier.

use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::classifier::config::ClassifierConfig;
use crate::classifier::engine::VegetableClassifier;
use crate::error::ClassifierError;

type Slot = Mutex<Option<Arc<VegetableClassifier>>>;

lazy_static! {
    static ref CLASSIFIER: Slot = Mutex::new(None);
}

/// The first caller loads the model; everyone after shares the same engine.
/// A failed load leaves the slot empty, so a later request with a corrected
/// path can still succeed.
pub fn get_classifier(config: &ClassifierConfig) -> Result<Arc<VegetableClassifier>, ClassifierError> {
    get_or_load(&CLASSIFIER, config)
}

fn get_or_load(
    slot: &Slot,
    config: &ClassifierConfig,
) -> Result<Arc<VegetableClassifier>, ClassifierError> {
    let mut guard = slot.lock().unwrap();
    if let Some(classifier) = guard.as_ref() {
        return Ok(Arc::clone(classifier));
    }
    log::info!("loading classifier model from {}", config.model_path.display());
    let classifier = Arc::new(VegetableClassifier::load(
        &config.model_path,
        config.preprocess.clone(),
    )?);
    *guard = Some(Arc::clone(&classifier));
    Ok(classifier)
}
