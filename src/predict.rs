use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PredictError;
use crate::grades::{CategoryAverages, PerformanceCategory};
use crate::models::{GradingComponent, PredictionSource};

/// Relative importance of each category when predicting a grade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryWeights {
    pub quiz: f64,
    pub exam: f64,
    pub project: f64,
    pub attendance: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            quiz: 0.25,
            exam: 0.30,
            project: 0.25,
            attendance: 0.20,
        }
    }
}

impl CategoryWeights {
    /// Reads weights from the active grading components whose names identify
    /// a category. Falls back to the defaults when none do.
    pub fn from_components(components: &[GradingComponent]) -> Self {
        let mut weights = CategoryWeights {
            quiz: 0.0,
            exam: 0.0,
            project: 0.0,
            attendance: 0.0,
        };
        let mut matched = false;

        for component in components.iter().filter(|c| c.status.is_active()) {
            let name = component.name.trim().to_ascii_lowercase();
            let slot = match name.trim_end_matches('s') {
                "quiz" | "quizze" => &mut weights.quiz,
                "exam" => &mut weights.exam,
                "project" => &mut weights.project,
                "attendance" => &mut weights.attendance,
                _ => continue,
            };
            *slot += component.weight;
            matched = true;
        }

        if matched {
            weights
        } else {
            CategoryWeights::default()
        }
    }

    fn pairs(&self, averages: &CategoryAverages) -> Vec<(f64, f64)> {
        [
            (averages.quiz, self.quiz),
            (averages.exam, self.exam),
            (averages.project, self.project),
            (averages.attendance, self.attendance),
        ]
        .into_iter()
        .filter_map(|(value, weight)| value.map(|value| (value, weight)))
        .filter(|(_, weight)| *weight > 0.0)
        .collect()
    }
}

/// Weighted average over the present categories, with weights renormalised
/// to sum to one. Present categories that the configured weights all ignore
/// are scored with the default weights instead.
pub fn heuristic_grade(
    averages: &CategoryAverages,
    weights: &CategoryWeights,
) -> Result<f64, PredictError> {
    let mut pairs = weights.pairs(averages);
    if pairs.is_empty() && !averages.is_empty() {
        debug!("configured weights ignore every present category, using defaults");
        pairs = CategoryWeights::default().pairs(averages);
    }
    let total_weight: f64 = pairs.iter().map(|(_, weight)| weight).sum();
    if pairs.is_empty() || total_weight <= 0.0 {
        return Err(PredictError::InsufficientData);
    }
    Ok(pairs
        .iter()
        .map(|(value, weight)| value * weight / total_weight)
        .sum())
}

/// A statistical grade model. Returning `None` hands the request back to
/// the heuristic.
pub trait GradeModel: Send + Sync {
    fn predict(&self, averages: &CategoryAverages) -> Option<f64>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub predicted_grade: f64,
    pub category: PerformanceCategory,
    pub source: PredictionSource,
}

pub struct Predictor {
    weights: CategoryWeights,
    model: Option<Box<dyn GradeModel>>,
}

impl Predictor {
    pub fn new(weights: CategoryWeights) -> Self {
        Self {
            weights,
            model: None,
        }
    }

    /// Embedders that ship a statistical model attach it here.
    #[allow(dead_code)]
    pub fn with_model(mut self, model: Box<dyn GradeModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn predict(&self, averages: &CategoryAverages) -> Result<Prediction, PredictError> {
        if averages.is_empty() {
            return Err(PredictError::InsufficientData);
        }

        match self.model.as_ref() {
            Some(model) => match model.predict(averages) {
                Some(grade) if grade.is_finite() => {
                    let grade = grade.clamp(0.0, 100.0);
                    debug!(grade, "statistical model produced prediction");
                    return Ok(Prediction {
                        predicted_grade: grade,
                        category: PerformanceCategory::from_grade(grade),
                        source: PredictionSource::Model,
                    });
                }
                _ => warn!("statistical model declined, using heuristic weights"),
            },
            None => debug!("no statistical model configured, using heuristic weights"),
        }

        let grade = heuristic_grade(averages, &self.weights)?;
        Ok(Prediction {
            predicted_grade: grade,
            category: PerformanceCategory::from_grade(grade),
            source: PredictionSource::Heuristic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use uuid::Uuid;

    fn component(name: &str, weight: f64, status: RecordStatus) -> GradingComponent {
        GradingComponent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            weight,
            status,
        }
    }

    struct FixedModel(Option<f64>);

    impl GradeModel for FixedModel {
        fn predict(&self, _averages: &CategoryAverages) -> Option<f64> {
            self.0
        }
    }

    #[test]
    fn renormalises_over_present_categories() {
        let averages = CategoryAverages {
            quiz: Some(80.0),
            exam: Some(90.0),
            ..CategoryAverages::default()
        };
        let grade = heuristic_grade(&averages, &CategoryWeights::default()).unwrap();
        assert!((grade - 85.4545).abs() < 0.001);
    }

    #[test]
    fn all_categories_use_default_weights() {
        let averages = CategoryAverages {
            quiz: Some(80.0),
            exam: Some(90.0),
            project: Some(70.0),
            attendance: Some(100.0),
        };
        let grade = heuristic_grade(&averages, &CategoryWeights::default()).unwrap();
        assert!((grade - 84.5).abs() < 0.001);
    }

    #[test]
    fn no_categories_is_insufficient_data() {
        let predictor = Predictor::new(CategoryWeights::default());
        let err = predictor.predict(&CategoryAverages::default()).unwrap_err();
        assert_eq!(err, PredictError::InsufficientData);
    }

    #[test]
    fn weights_follow_active_components() {
        let components = vec![
            component("Quizzes", 20.0, RecordStatus::Active),
            component("Exam", 50.0, RecordStatus::Active),
            component("Project", 30.0, RecordStatus::Inactive),
            component("Recitation", 10.0, RecordStatus::Active),
        ];
        let weights = CategoryWeights::from_components(&components);
        assert_eq!(weights.quiz, 20.0);
        assert_eq!(weights.exam, 50.0);
        assert_eq!(weights.project, 0.0);
        assert_eq!(weights.attendance, 0.0);

        let averages = CategoryAverages {
            quiz: Some(60.0),
            exam: Some(90.0),
            project: Some(10.0),
            attendance: None,
        };
        let grade = heuristic_grade(&averages, &weights).unwrap();
        assert!((grade - (60.0 * 20.0 + 90.0 * 50.0) / 70.0).abs() < 0.001);

        assert_eq!(
            heuristic_grade(&CategoryAverages::default(), &weights).unwrap_err(),
            PredictError::InsufficientData
        );
    }

    #[test]
    fn unweighted_present_categories_fall_back_to_defaults() {
        let components = vec![
            component("Quiz", 40.0, RecordStatus::Active),
            component("Exam", 60.0, RecordStatus::Active),
        ];
        let weights = CategoryWeights::from_components(&components);
        let averages = CategoryAverages {
            project: Some(95.0),
            attendance: Some(100.0),
            ..CategoryAverages::default()
        };

        // project 0.25 and attendance 0.20 renormalised over 0.45
        let grade = heuristic_grade(&averages, &weights).unwrap();
        assert!((grade - (95.0 * 0.25 + 100.0 * 0.20) / 0.45).abs() < 0.001);

        let prediction = Predictor::new(weights).predict(&averages).unwrap();
        assert_eq!(prediction.source, PredictionSource::Heuristic);
        assert_eq!(prediction.category, PerformanceCategory::Excellent);
    }

    #[test]
    fn unrelated_components_keep_defaults() {
        let components = vec![component("Recitation", 40.0, RecordStatus::Active)];
        assert_eq!(
            CategoryWeights::from_components(&components),
            CategoryWeights::default()
        );
        assert_eq!(CategoryWeights::from_components(&[]), CategoryWeights::default());
    }

    #[test]
    fn model_used_when_available() {
        let averages = CategoryAverages {
            quiz: Some(80.0),
            ..CategoryAverages::default()
        };
        let predictor =
            Predictor::new(CategoryWeights::default()).with_model(Box::new(FixedModel(Some(91.0))));
        let prediction = predictor.predict(&averages).unwrap();
        assert_eq!(prediction.source, PredictionSource::Model);
        assert_eq!(prediction.category, PerformanceCategory::Excellent);
    }

    #[test]
    fn declining_model_degrades_to_heuristic() {
        let averages = CategoryAverages {
            quiz: Some(65.0),
            ..CategoryAverages::default()
        };
        let predictor =
            Predictor::new(CategoryWeights::default()).with_model(Box::new(FixedModel(None)));
        let prediction = predictor.predict(&averages).unwrap();
        assert_eq!(prediction.source, PredictionSource::Heuristic);
        assert_eq!(prediction.predicted_grade, 65.0);
        assert_eq!(prediction.category, PerformanceCategory::AtRisk);
    }
}
