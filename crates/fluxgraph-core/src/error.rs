use crate::id::{ElementId, ElementKind};

/// Errors that can occur during graph operations.
///
/// Validation and invariant errors are surfaced at the originating call
/// and prevent any mutation. Semantic dead-ends during a tick (empty
/// buffers, unselected gates, failed guards) are not errors — they just
/// produce nothing.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("id already exists: {0}")]
    IdExists(ElementId),
    #[error("edge id already exists: {0}")]
    EdgeIdExists(ElementId),
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("id not found: {0}")]
    IdNotFound(ElementId),
    #[error("connecting node with non-existing id: {0}")]
    MissingEndpoint(ElementId),
    #[error("cannot connect an element to itself")]
    SelfLoop,
    #[error("edge must not start from an edge")]
    EdgeFromEdge,
    #[error("edge must not point to an edge")]
    EdgeToEdge,
    #[error("missing swap input index")]
    MissingSwapInputIndex,
    #[error("swap index out of range: {0}")]
    SwapIndexOutOfRange(usize),
    #[error("output weight must be >= 0")]
    NegativeWeight,
    #[error("must add or subtract a non-negative amount")]
    NegativeAmount,
    #[error("cannot swap a negative amount of tokens")]
    NegativeSwapAmount,
    #[error("the output edge is not connected to this gate")]
    EdgeNotOnGate,
    #[error("element {id} is not a {expected}")]
    WrongKind { id: ElementId, expected: ElementKind },
    #[error("token `{0}` is not produced upstream")]
    UnknownToken(String),
    #[error("all tokens must have a positive amount")]
    NonPositiveTokenAmount,
    #[error("constraint must be positive")]
    NonPositiveConstraint,
    #[error("duplicate token types are not allowed")]
    DuplicateTokens,
    #[error("label is not a valid identifier: `{0}`")]
    InvalidLabel(String),
    #[error("token is not a valid identifier: `{0}`")]
    InvalidToken(String),
    #[error("expression failed to compile: {0}")]
    Compile(#[from] fluxgraph_expr::CompileError),
    #[error("expression failed to evaluate: {0}")]
    Eval(#[from] fluxgraph_expr::EvalError),
    #[error("malformed graph json: {0}")]
    Json(#[from] serde_json::Error),
}
