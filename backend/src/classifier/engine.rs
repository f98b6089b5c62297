//! The loaded TFLite classifier and single-image inference.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tract_tflite::prelude::*;

use shared::{ClassProbabilities, PredictionResult, VegetableCondition};

use crate::classifier::config::PreprocessConfig;
use crate::classifier::preprocess::{decode_image, ImagePreprocessor};
use crate::error::ClassifierError;

const CLASS_COUNT: usize = 2;

/// Owns the optimized inference plan for the produce-integrity model. Loaded
/// once per process (see [`crate::classifier::registry`]) and shared
/// read-only; the plan itself sits behind a mutex so concurrent requests
/// take turns on the interpreter.
#[derive(Debug)]
pub struct VegetableClassifier {
    plan: Mutex<TypedSimplePlan<TypedModel>>,
    input_dtype: DatumType,
    preprocessor: ImagePreprocessor,
    input_height: usize,
    input_width: usize,
}

impl VegetableClassifier {
    /// Loads and optimizes the model artifact. Fails fast on a missing path
    /// or an artifact tract cannot parse.
    pub fn load(model_path: &Path, preprocess: PreprocessConfig) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelLoad(format!(
                "model not found at {}",
                model_path.display()
            )));
        }

        let load_err =
            |e: &dyn std::fmt::Display| ClassifierError::ModelLoad(format!("{}: {e}", model_path.display()));

        let model = tract_tflite::tflite()
            .model_for_path(model_path)
            .map_err(|e| load_err(&e))?;
        let inlet = *model
            .input_outlets()
            .map_err(|e| load_err(&e))?
            .first()
            .ok_or_else(|| load_err(&"model has no inputs"))?;
        let input_dtype = model.outlet_fact(inlet).map_err(|e| load_err(&e))?.datum_type;
        if !matches!(input_dtype, DatumType::F32 | DatumType::U8) {
            return Err(ClassifierError::ModelLoad(format!(
                "unsupported model input dtype {input_dtype:?} (expected F32 or U8)"
            )));
        }

        let input_height = preprocess.target_height as usize;
        let input_width = preprocess.target_width as usize;
        let fact = TypedFact::dt_shape(input_dtype, tvec!(1, input_height, input_width, 3));
        let plan = model
            .with_input_fact(0, fact)
            .map_err(|e| load_err(&e))?
            .into_optimized()
            .map_err(|e| load_err(&e))?
            .into_runnable()
            .map_err(|e| load_err(&e))?;

        Ok(Self {
            plan: Mutex::new(plan),
            input_dtype,
            preprocessor: ImagePreprocessor::new(preprocess),
            input_height,
            input_width,
        })
    }

    /// Decode, preprocess and classify one image.
    pub fn predict(&self, image_path: &Path) -> Result<PredictionResult, ClassifierError> {
        let image = decode_image(image_path)?;
        let tensor = self.preprocessor.preprocess(&image)?;

        let (h, w) = (self.input_height, self.input_width);
        // Leading batch axis of 1, cast to the dtype the model declares.
        let input: Tensor = match self.input_dtype {
            DatumType::U8 => tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                (tensor[[y, x, c]] * 255.0).round() as u8
            })
            .into(),
            _ => tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                tensor[[y, x, c]]
            })
            .into(),
        };

        let outputs = self
            .plan
            .lock()
            .unwrap()
            .run(tvec!(input.into()))
            .map_err(|e| {
                log::error!(
                    "inference failed for {} (decoded {}x{}): {e}",
                    image_path.display(),
                    image.width(),
                    image.height()
                );
                ClassifierError::Inference(e.to_string())
            })?;

        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".to_string()))?;
        let scores = output
            .cast_to::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("output is not numeric: {e}")))?;
        let view = scores
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let flat: Vec<f32> = view.iter().copied().collect();
        let scores: [f32; CLASS_COUNT] = flat.as_slice().try_into().map_err(|_| {
            ClassifierError::Inference(format!(
                "expected {CLASS_COUNT} class scores, got {}",
                flat.len()
            ))
        })?;
        result_from_scores(scores)
    }

    /// Classifies images sequentially. One bad image does not abort the
    /// batch; its slot carries the error instead.
    pub fn predict_batch(
        &self,
        image_paths: &[PathBuf],
    ) -> Vec<Result<PredictionResult, ClassifierError>> {
        image_paths.iter().map(|path| self.predict(path)).collect()
    }
}

/// Scores arrive ordered [intact, not-intact]. The strict comparison keeps
/// index 0 ("Utuh") on an exact tie.
pub(crate) fn result_from_scores(
    scores: [f32; CLASS_COUNT],
) -> Result<PredictionResult, ClassifierError> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifierError::Inference(format!(
            "non-finite class scores {scores:?}"
        )));
    }
    let (index, confidence) = if scores[1] > scores[0] {
        (1, scores[1])
    } else {
        (0, scores[0])
    };
    Ok(PredictionResult {
        prediction: VegetableCondition::LABELS[index],
        confidence,
        class_probabilities: ClassProbabilities {
            utuh: scores[0],
            tidak_utuh: scores[1],
        },
    })
}
