// Per-model cost table and cost calculation.
//
// The only provider this crate ships (`provider::mock::MockProvider`)
// always reports `model_id = "mock-model"`, which falls through to the
// default arm below, so the named arms are not exercised by any request
// path today. Kept for the real cloud `Provider` impl referenced in
// DESIGN.md's "Dropped teacher dependencies" note — a real backend would
// report its actual model id and want the matching rate.

/// Pricing information for a specific model
#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_write_per_million: f64,
    pub cache_read_per_million: f64,
}

/// Get pricing for a specific model
/// Returns default (Sonnet) pricing for unknown models
pub fn get_pricing(model: &str) -> ModelPricing {
    match model {
        // Claude 3.5 Sonnet (Latest)
        "claude-3-5-sonnet-20241022" => ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
            cache_write_per_million: 3.75,
            cache_read_per_million: 0.30,
        },

        // Claude 3.5 Haiku
        "claude-3-5-haiku-20241022" => ModelPricing {
            input_per_million: 1.00,
            output_per_million: 5.00,
            cache_write_per_million: 1.25,
            cache_read_per_million: 0.10,
        },

        // Claude 3 Opus
        "claude-3-opus-20240229" => ModelPricing {
            input_per_million: 15.00,
            output_per_million: 75.00,
            cache_write_per_million: 18.75,
            cache_read_per_million: 1.50,
        },

        // Claude 3 Sonnet (older)
        "claude-3-sonnet-20240229" => ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
            cache_write_per_million: 3.75,
            cache_read_per_million: 0.30,
        },

        // Claude 3 Haiku (older)
        "claude-3-haiku-20240307" => ModelPricing {
            input_per_million: 0.25,
            output_per_million: 1.25,
            cache_write_per_million: 0.30,
            cache_read_per_million: 0.03,
        },

        // Default to Claude 3.5 Sonnet pricing for unknown models
        _ => ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
            cache_write_per_million: 3.75,
            cache_read_per_million: 0.30,
        },
    }
}

/// Calculate cost in USD for the given token usage
pub fn calculate_cost(
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cache_creation_tokens: u32,
    cache_read_tokens: u32,
) -> f64 {
    let pricing = get_pricing(model);

    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_million;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output_per_million;
    let cache_write_cost =
        (cache_creation_tokens as f64 / 1_000_000.0) * pricing.cache_write_per_million;
    let cache_read_cost = (cache_read_tokens as f64 / 1_000_000.0) * pricing.cache_read_per_million;

    input_cost + output_cost + cache_write_cost + cache_read_cost
}
