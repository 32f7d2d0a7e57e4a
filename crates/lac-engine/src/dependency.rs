//! Output dependency analysis for requested-output evaluation.
//!
//! An action depends on another when it references that action's output.
//! Only references to outputs produced in the same rule count; everything
//! else resolves through the context.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use lac_rules::{Action, SpecError};

/// Actions to execute so `requested` can be computed, in an order where
/// every action runs after the outputs it reads. `None` selects every
/// action in declaration order. An output no action produces selects
/// nothing.
pub fn required_actions<'a>(actions: &'a [Action], requested: Option<&str>) -> Result<Vec<&'a Action>, SpecError> {
    let Some(requested) = requested else {
        return Ok(actions.iter().collect());
    };

    let by_output: BTreeMap<&str, usize> = actions.iter().enumerate().map(|(i, a)| (a.output.as_str(), i)).collect();
    if !by_output.contains_key(requested) {
        return Ok(Vec::new());
    }

    let deps: Vec<BTreeSet<usize>> = actions
        .iter()
        .map(|action| {
            action
                .references()
                .iter()
                .filter_map(|path| {
                    let root = path.split('.').next().unwrap_or(path);
                    by_output.get(root).copied()
                })
                .collect()
        })
        .collect();

    let mut needed = BTreeSet::new();
    let mut queue = VecDeque::from([by_output[requested]]);
    while let Some(index) = queue.pop_front() {
        if needed.insert(index) {
            queue.extend(deps[index].iter().copied());
        }
    }

    let mut remaining: BTreeMap<usize, usize> =
        needed.iter().map(|&i| (i, deps[i].iter().filter(|d| needed.contains(*d)).count())).collect();
    let mut ordered = Vec::with_capacity(needed.len());
    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining.iter().filter(|(_, n)| **n == 0).map(|(i, _)| *i).collect();
        let Some(&next) = ready.first() else {
            let output = remaining.keys().next().map(|&i| actions[i].output.clone()).unwrap_or_default();
            return Err(SpecError::CircularDependency { output });
        };
        remaining.remove(&next);
        for (i, count) in remaining.iter_mut() {
            if deps[*i].contains(&next) {
                *count -= 1;
            }
        }
        ordered.push(&actions[next]);
    }
    Ok(ordered)
}
