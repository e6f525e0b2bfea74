/// Build the adjudication prompt for one candidate pair.
///
/// The Stage 1 similarity is given as context only, with four decimals.
pub fn build_prompt(query_title: &str, candidate_title: &str, similarity: f32) -> String {
    format!(
        r#"You are an e-commerce product matching expert. Decide whether the two listings below are the same product.

Product A (catalog A): {query_title}
Product B (catalog B): {candidate_title}
Stage 1 similarity: {similarity:.4}

Apply these rules strictly.

Core matching rules:
1. Brand and model must match exactly. Brand names in different languages are the same brand (for example "Logitech" and "羅技").
2. Spec variants: a different primary spec (for example 128G vs 256G capacity) means different products.
3. Color: the same product in a different color is ALWAYS the same product. Ignore color differences.

Strict exclusions (these are never a match):
1. Bundle vs single item: a single item is not a bundle, set or multi-pack.
   Keywords: 組合, 套組, ×2, ×3, 多入, +, 贈, 送, bundle, pack.
2. Genuine vs third-party or compatible accessory: an original product is not a third-party, compatible or universal one.
   Keywords: 副廠, 相容, 適用, 通用, compatible.
3. Limited or special edition vs standard edition: a standard product is not a limited, refurbished, clearance or special edition.
   Even when both sides are refurbished or special editions, treat them as different products because their condition may differ.

Reply with JSON only, exactly in this shape:
{{
    "is_match": true or false,
    "confidence": "high" or "medium" or "low",
    "reasoning": "short justification in Traditional Chinese, at most 30 characters"
}}
"#
    )
}
