//! Three-way diff between two versions of a workflow and one proposal
//! template's current steps.
//!
//! Blueprints are matched across versions by `id`. The template's step for a
//! blueprint is found by the blueprint's *previous* title (its own title when
//! the blueprint is new), so a renamed step updates in place instead of being
//! deleted and recreated. Blueprints that existed in the previous version
//! claim their steps before new ones do.

use std::collections::HashSet;

use crate::models::evaluation::EvaluationType;

use super::types::EvaluationBlueprint;

/// The structural view of a template step the diff works on.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStep {
    pub id: i64,
    pub index: i32,
    pub title: String,
    pub evaluation_type: EvaluationType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub id: i64,
    pub index: i32,
    pub title: String,
    pub evaluation_type: EvaluationType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepCreate {
    pub index: i32,
    pub blueprint: EvaluationBlueprint,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationDiff {
    pub create: Vec<StepCreate>,
    pub update: Vec<StepUpdate>,
    pub delete: Vec<i64>,
}

impl EvaluationDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

pub fn diff_template_evaluations(
    previous: &[EvaluationBlueprint],
    next: &[EvaluationBlueprint],
    current: &[TemplateStep],
) -> EvaluationDiff {
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut matched: Vec<Option<&TemplateStep>> = vec![None; next.len()];

    for carried_over in [true, false] {
        for (position, blueprint) in next.iter().enumerate() {
            let previous_title = previous
                .iter()
                .find(|old| old.id == blueprint.id)
                .map(|old| old.title.as_str());
            if previous_title.is_some() != carried_over {
                continue;
            }
            let lookup_title = previous_title.unwrap_or(blueprint.title.as_str());
            if let Some(step) = current
                .iter()
                .find(|step| !claimed.contains(&step.id) && step.title == lookup_title)
            {
                claimed.insert(step.id);
                matched[position] = Some(step);
            }
        }
    }

    let mut diff = EvaluationDiff::default();
    for (position, (blueprint, step)) in next.iter().zip(matched).enumerate() {
        let index = position as i32;
        match step {
            Some(step) => {
                let changed = step.index != index
                    || step.title != blueprint.title
                    || step.evaluation_type != blueprint.evaluation_type;
                if changed {
                    diff.update.push(StepUpdate {
                        id: step.id,
                        index,
                        title: blueprint.title.clone(),
                        evaluation_type: blueprint.evaluation_type,
                    });
                }
            }
            None => diff.create.push(StepCreate {
                index,
                blueprint: blueprint.clone(),
            }),
        }
    }

    diff.delete = current
        .iter()
        .filter(|step| !claimed.contains(&step.id))
        .map(|step| step.id)
        .collect();

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(id: &str, title: &str, evaluation_type: EvaluationType) -> EvaluationBlueprint {
        EvaluationBlueprint {
            id: id.to_string(),
            title: title.to_string(),
            evaluation_type,
            required_reviews: 1,
            final_step: false,
            vote_settings: None,
            appealable: false,
            appeal_required_reviews: 1,
            rubric_criteria: Vec::new(),
        }
    }

    fn step(id: i64, index: i32, title: &str, evaluation_type: EvaluationType) -> TemplateStep {
        TemplateStep {
            id,
            index,
            title: title.to_string(),
            evaluation_type,
        }
    }

    #[test]
    fn unchanged_workflow_produces_empty_diff() {
        let wf = vec![
            blueprint("a", "Feedback", EvaluationType::Feedback),
            blueprint("b", "Review", EvaluationType::PassFail),
        ];
        let template = vec![
            step(1, 0, "Feedback", EvaluationType::Feedback),
            step(2, 1, "Review", EvaluationType::PassFail),
        ];
        assert!(diff_template_evaluations(&wf, &wf, &template).is_empty());
    }

    #[test]
    fn rename_is_an_update_not_delete_and_create() {
        let old = vec![blueprint("a", "Review", EvaluationType::PassFail)];
        let new = vec![blueprint("a", "Committee review", EvaluationType::PassFail)];
        let template = vec![step(7, 0, "Review", EvaluationType::PassFail)];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert!(diff.create.is_empty());
        assert!(diff.delete.is_empty());
        assert_eq!(
            diff.update,
            vec![StepUpdate {
                id: 7,
                index: 0,
                title: "Committee review".to_string(),
                evaluation_type: EvaluationType::PassFail,
            }]
        );
    }

    #[test]
    fn added_blueprint_is_created_at_its_new_index() {
        let old = vec![blueprint("a", "Feedback", EvaluationType::Feedback)];
        let new = vec![
            blueprint("a", "Feedback", EvaluationType::Feedback),
            blueprint("b", "Community vote", EvaluationType::Vote),
        ];
        let template = vec![step(1, 0, "Feedback", EvaluationType::Feedback)];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.create[0].index, 1);
        assert_eq!(diff.create[0].blueprint.id, "b");
        assert!(diff.update.is_empty());
        assert!(diff.delete.is_empty());
    }

    #[test]
    fn removed_blueprint_deletes_template_step_and_reindexes_the_rest() {
        let old = vec![
            blueprint("a", "Feedback", EvaluationType::Feedback),
            blueprint("b", "Rubric", EvaluationType::Rubric),
            blueprint("c", "Vote", EvaluationType::Vote),
        ];
        let new = vec![
            blueprint("a", "Feedback", EvaluationType::Feedback),
            blueprint("c", "Vote", EvaluationType::Vote),
        ];
        let template = vec![
            step(1, 0, "Feedback", EvaluationType::Feedback),
            step(2, 1, "Rubric", EvaluationType::Rubric),
            step(3, 2, "Vote", EvaluationType::Vote),
        ];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert_eq!(diff.delete, vec![2]);
        assert_eq!(
            diff.update,
            vec![StepUpdate {
                id: 3,
                index: 1,
                title: "Vote".to_string(),
                evaluation_type: EvaluationType::Vote,
            }]
        );
        assert!(diff.create.is_empty());
    }

    #[test]
    fn diverged_template_step_is_replaced() {
        // The template renamed its own copy of "Review", so the previous title
        // no longer finds it.
        let old = vec![blueprint("a", "Review", EvaluationType::PassFail)];
        let new = vec![blueprint("a", "Final review", EvaluationType::PassFail)];
        let template = vec![step(5, 0, "Custom review", EvaluationType::PassFail)];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.delete, vec![5]);
    }

    #[test]
    fn duplicate_titles_are_claimed_once_each() {
        let wf = vec![
            blueprint("a", "Review", EvaluationType::PassFail),
            blueprint("b", "Review", EvaluationType::PassFail),
        ];
        let template = vec![
            step(1, 0, "Review", EvaluationType::PassFail),
            step(2, 1, "Review", EvaluationType::PassFail),
        ];
        assert!(diff_template_evaluations(&wf, &wf, &template).is_empty());
    }

    #[test]
    fn type_change_is_propagated() {
        let old = vec![blueprint("a", "Decision", EvaluationType::PassFail)];
        let new = vec![blueprint("a", "Decision", EvaluationType::Vote)];
        let template = vec![step(4, 0, "Decision", EvaluationType::PassFail)];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0].evaluation_type, EvaluationType::Vote);
    }

    #[test]
    fn renamed_step_keeps_its_row_when_a_new_step_takes_the_old_title() {
        let old = vec![blueprint("a", "Review", EvaluationType::PassFail)];
        let new = vec![
            blueprint("c", "Review", EvaluationType::PassFail),
            blueprint("a", "Audit", EvaluationType::PassFail),
        ];
        let template = vec![step(7, 0, "Review", EvaluationType::PassFail)];

        let diff = diff_template_evaluations(&old, &new, &template);
        assert_eq!(
            diff.update,
            vec![StepUpdate {
                id: 7,
                index: 1,
                title: "Audit".to_string(),
                evaluation_type: EvaluationType::PassFail,
            }]
        );
        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.create[0].blueprint.id, "c");
        assert_eq!(diff.create[0].index, 0);
        assert!(diff.delete.is_empty());
    }
}
