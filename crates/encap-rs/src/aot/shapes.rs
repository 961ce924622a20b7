use crate::config::ShapeHintSet;
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{Node, PartialShape};

/// Op of graph-input nodes.
pub const OP_PLACEHOLDER: &str = "Placeholder";
pub const ATTR_OUTPUT_SHAPES: &str = "_output_shapes";
pub const ATTR_SHAPE: &str = "shape";

/// Shape declared on a graph input, preferring the first inferred output shape.
pub fn declared_shape(node: &Node) -> Option<PartialShape> {
    node.attr(ATTR_OUTPUT_SHAPES)
        .and_then(|value| value.as_shape_list())
        .and_then(|shapes| shapes.first())
        .or_else(|| node.attr(ATTR_SHAPE).and_then(|value| value.as_shape()))
        .cloned()
}

/// Merges what the graph declares for `node` with what the caller hinted.
///
/// An absent or rank-0 declaration is overridden by the hint; otherwise the
/// hint may only fill unknown axes.
pub fn combine_shape(
    node: &str,
    declared: Option<&PartialShape>,
    hint: Option<&[usize]>,
    hints: &ShapeHintSet,
) -> EncapsulateResult<Vec<usize>> {
    match (declared, hint) {
        (None, Some(hint)) => Ok(hint.to_vec()),
        (Some(declared), Some(hint)) if declared.is_empty() => Ok(hint.to_vec()),
        (Some(declared), Some(hint)) => {
            declared
                .concretize(hint)
                .map_err(|source| EncapsulateError::ShapeHintConflict {
                    node: node.to_string(),
                    hint: hint_as_string(hints),
                    source,
                })
        }
        (Some(declared), None) => {
            declared
                .static_dims()
                .ok_or_else(|| EncapsulateError::NotConcretized {
                    node: node.to_string(),
                    hint: hint_as_string(hints),
                })
        }
        (None, None) => Err(EncapsulateError::NotConcretized {
            node: node.to_string(),
            hint: hint_as_string(hints),
        }),
    }
}

/// Human-readable hint set, e.g. `{x:[2,3], y:[4]}`.
pub fn hint_as_string(hints: &ShapeHintSet) -> String {
    let entries = hints
        .iter()
        .map(|(name, dims)| {
            let dims = dims
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("{name}:[{dims}]")
        })
        .collect::<Vec<_>>();
    format!("{{{}}}", entries.join(", "))
}

/// Runtime lookup key for a set of concrete input shapes.
///
/// Every dimension is followed by `,`, every input ends with `;` and the key
/// ends with `/`, so `[[2, 3], [4]]` becomes `2,3,;4,;/`.
pub fn signature(shapes: &[Vec<usize>]) -> String {
    let mut signature = String::new();
    for shape in shapes {
        for dim in shape {
            signature.push_str(&dim.to_string());
            signature.push(',');
        }
        signature.push(';');
    }
    signature.push('/');
    signature
}
