//! Dependency grapher — compile an activity list into parallel steps.
//!
//! Rules enforced:
//! 1. Activity IDs must be unique within the orchestration.
//! 2. Every `depends_on` entry must reference an existing activity.
//! 3. The directed graph must be acyclic.
//!
//! Edges point from a dependent activity to each of its dependencies. Levels
//! are peeled off from the dependent end (vertices nothing else still points
//! at), which yields "dependencies last"; the level list is reversed before
//! it is returned, so step 0 holds the activities with no dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    models::{Activity, Step},
    EngineError,
};

/// Build the dependency graph for `activities` and return it as ordered steps.
///
/// Within a step, activities keep their declaration order.
///
/// # Errors
/// - [`EngineError::DuplicateActivityId`] if two activities share an ID.
/// - [`EngineError::DependencyNotFound`] if a dependency is missing.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn instantiate(activities: &[Activity]) -> Result<Vec<Step>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure activity IDs are unique
    // -----------------------------------------------------------------------
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(activities.len());
    for (i, activity) in activities.iter().enumerate() {
        if index.insert(activity.id.as_str(), i).is_some() {
            return Err(EngineError::DuplicateActivityId(activity.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Build edges, validating every dependency
    // -----------------------------------------------------------------------
    // dependencies[i] = activities i depends on (outgoing edges)
    let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); activities.len()];
    // in_degree[j] = number of activities still depending on j
    let mut in_degree: Vec<usize> = vec![0; activities.len()];

    for (i, activity) in activities.iter().enumerate() {
        for dep in &activity.depends_on {
            let j = *index
                .get(dep.as_str())
                .ok_or_else(|| EngineError::DependencyNotFound {
                    activity_id: activity.id.clone(),
                    dependency: dep.clone(),
                })?;
            if dependencies[i].insert(j) {
                in_degree[j] += 1;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Peel levels, dependents first
    // -----------------------------------------------------------------------
    let mut remaining: BTreeSet<usize> = (0..activities.len()).collect();
    let mut levels: Vec<Vec<usize>> = Vec::new();

    while !remaining.is_empty() {
        let level: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| in_degree[i] == 0)
            .collect();

        if level.is_empty() {
            return Err(EngineError::CycleDetected {
                vertices: find_cycle(activities, &dependencies, &remaining),
            });
        }

        for &i in &level {
            remaining.remove(&i);
            for &j in &dependencies[i] {
                in_degree[j] -= 1;
            }
        }
        levels.push(level);
    }

    levels.reverse();

    Ok(levels
        .into_iter()
        .map(|level| Step {
            activities: level.into_iter().map(|i| activities[i].clone()).collect(),
        })
        .collect())
}

/// Walk from a stuck vertex through stuck dependents until one repeats.
///
/// Every vertex left after peeling still has a dependent among the leftovers,
/// so the walk always closes a loop. The returned ids follow dependency
/// direction (each one depends on the next, the last on the first).
fn find_cycle(
    activities: &[Activity],
    dependencies: &[BTreeSet<usize>],
    remaining: &BTreeSet<usize>,
) -> Vec<String> {
    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut seen: HashSet<usize> = HashSet::from([start]);
    let mut current = start;

    loop {
        // Any leftover vertex that depends on `current`.
        let Some(dependent) = remaining
            .iter()
            .copied()
            .find(|&k| dependencies[k].contains(&current))
        else {
            break;
        };

        if !seen.insert(dependent) {
            let from = path.iter().position(|&v| v == dependent).unwrap_or(0);
            let mut cycle: Vec<String> = path[from..]
                .iter()
                .map(|&v| activities[v].id.clone())
                .collect();
            cycle.reverse();
            return cycle;
        }
        path.push(dependent);
        current = dependent;
    }

    vec![activities[start].id.clone()]
}
