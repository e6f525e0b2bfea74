use crate::domain::listing::SourceTag;

/// Build the embedding input for a listing title.
///
/// The E5 family is trained with asymmetric role markers: the listing we are
/// searching for gets `query: `, listings searched against get `passage: `.
pub fn embedding_text(title: &str, source: SourceTag) -> String {
    let prefix = match source {
        SourceTag::A => "query: ",
        SourceTag::B => "passage: ",
    };
    format!("{prefix}{title}")
}

/// Normalize a vector to unit length.
///
/// Returns the original vector when the norm is zero.
pub(crate) fn normalize_embedding(vec: &[f32]) -> Vec<f32> {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        vec.to_vec()
    } else {
        vec.iter().map(|x| x / norm).collect()
    }
}
