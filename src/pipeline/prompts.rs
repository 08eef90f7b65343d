//! Prompt templates for the extraction phases.
//!
//! Templates are plain strings with `{{placeholder}}` slots so deployments
//! can override them from configuration without recompiling. The defaults
//! here are the reference prompts; [`PromptSet`] carries whichever version
//! is active for a run.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;

/// Phase 1 template. Free-text decomposition, one line per client order.
const BREAKDOWN_TEMPLATE: &str = "\
You are an order-taking assistant for a small shop. A customer message may
contain orders for one or more clients, written informally.

Rewrite the message as a breakdown: one line per client order, in the form
<client>: <quantity> <product> (<variant>), <quantity> <product>, ...

Rules:
1. Keep every order mentioned, even when the client or product is unclear.
2. Never invent clients, products, or quantities that are not in the message.
3. Use the catalog below to resolve nicknames and shorthand when obvious.
4. Plain text only.

## Known clients
{{clients}}

## Known products
{{products}}

## Message
{{message}}";

/// Phase 2 template. Strict JSON structuring against the catalog.
const STRUCTURE_TEMPLATE: &str = "\
You are an order-structuring assistant. Convert the order breakdown below
into JSON, reconciling every name against the catalog.

Output a JSON array with one element per client order:
[
  {
    \"client\": { \"id\": \"catalog id or null\", \"name\": \"as written\", \"matchConfidence\": \"high|medium|low|unknown\" },
    \"items\": [
      {
        \"product\": { \"id\": \"catalog id or null\", \"name\": \"as written\" },
        \"quantity\": 3,
        \"variant\": { \"id\": \"catalog id or null\", \"name\": \"as written\" },
        \"status\": \"confirmed|ambiguous\",
        \"alternatives\": [ { \"id\": \"catalog id\", \"name\": \"candidate product\" } ],
        \"notes\": \"optional free text\"
      }
    ]
  }
]

Rules:
1. \"id\" must be an exact catalog id. Use null when unsure.
2. \"matchConfidence\" is \"high\" only for an unambiguous client match.
3. Mark an item \"ambiguous\" when the product, variant, or quantity is in
   doubt, and list candidate products in \"alternatives\".
4. A product that has variants needs a resolved \"variant\"; without one,
   mark the item \"ambiguous\".
5. Omit \"variant\" for products without variants.
6. Keep items in the order they were mentioned.
7. Output only the JSON array. No markdown fences, no commentary.

## Known clients
{{clients}}

## Known products
{{products}}

## Breakdown
{{breakdown}}";

/// Phase 3 template. Syntax-only repair of an unparsable payload.
const REPAIR_TEMPLATE: &str = "\
The following text was supposed to be a JSON array of client orders but it
failed to parse.

Fix the syntax and shape so it parses as a JSON array. Do not add, remove,
or reword any content values. Output only the corrected JSON array, with
no markdown fences and no commentary.

## Broken payload
{{payload}}";

// ---------------------------------------------------------------------------
// Prompt set
// ---------------------------------------------------------------------------

/// The three phase templates active for a run.
///
/// Deserializes from the `[prompts]` config section; absent fields fall
/// back to the built-in templates, so a deployment can override just one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    /// Phase 1 template. Slots: `{{message}}`, `{{clients}}`, `{{products}}`.
    #[serde(default = "default_breakdown")]
    pub breakdown: String,
    /// Phase 2 template. Slots: `{{breakdown}}`, `{{clients}}`, `{{products}}`.
    #[serde(default = "default_structure")]
    pub structure: String,
    /// Phase 3 template. Slot: `{{payload}}`.
    #[serde(default = "default_repair")]
    pub repair: String,
}

fn default_breakdown() -> String {
    BREAKDOWN_TEMPLATE.to_owned()
}

fn default_structure() -> String {
    STRUCTURE_TEMPLATE.to_owned()
}

fn default_repair() -> String {
    REPAIR_TEMPLATE.to_owned()
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            breakdown: default_breakdown(),
            structure: default_structure(),
            repair: default_repair(),
        }
    }
}

impl PromptSet {
    /// Compose the phase 1 prompt for a message.
    pub fn breakdown_prompt(&self, message: &str, catalog: &CatalogSnapshot) -> String {
        render(
            &self.breakdown,
            &[
                ("message", message),
                ("clients", &clients_for_prompt(catalog)),
                ("products", &products_for_prompt(catalog)),
            ],
        )
    }

    /// Compose the phase 2 prompt.
    ///
    /// `source` is the phase 1 output, or the raw message when the
    /// breakdown phase is skipped.
    pub fn structure_prompt(&self, source: &str, catalog: &CatalogSnapshot) -> String {
        render(
            &self.structure,
            &[
                ("breakdown", source),
                ("clients", &clients_for_prompt(catalog)),
                ("products", &products_for_prompt(catalog)),
            ],
        )
    }

    /// Compose the phase 3 prompt for an unparsable payload.
    pub fn repair_prompt(&self, payload: &str) -> String {
        render(&self.repair, &[("payload", payload)])
    }
}

/// Replace `{{name}}` slots in a template.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_owned();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

// ---------------------------------------------------------------------------
// Catalog context
// ---------------------------------------------------------------------------

/// Serialize clients as a JSON array for the prompt. Ids and names only.
fn clients_for_prompt(catalog: &CatalogSnapshot) -> String {
    #[derive(Serialize)]
    struct ClientForPrompt<'a> {
        id: &'a str,
        name: &'a str,
    }

    let clients: Vec<ClientForPrompt<'_>> = catalog
        .clients
        .iter()
        .map(|c| ClientForPrompt {
            id: &c.id,
            name: &c.name,
        })
        .collect();

    serde_json::to_string_pretty(&clients).unwrap_or_else(|_| "[]".to_owned())
}

/// Serialize products (with variants and prices) as a JSON array.
fn products_for_prompt(catalog: &CatalogSnapshot) -> String {
    #[derive(Serialize)]
    struct VariantForPrompt<'a> {
        id: &'a str,
        name: &'a str,
    }

    #[derive(Serialize)]
    struct ProductForPrompt<'a> {
        id: &'a str,
        name: &'a str,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        variants: Vec<VariantForPrompt<'a>>,
    }

    let products: Vec<ProductForPrompt<'_>> = catalog
        .products
        .iter()
        .map(|p| ProductForPrompt {
            id: &p.id,
            name: &p.name,
            variants: p
                .variants
                .iter()
                .map(|v| VariantForPrompt {
                    id: &v.id,
                    name: &v.name,
                })
                .collect(),
        })
        .collect();

    serde_json::to_string_pretty(&products).unwrap_or_else(|_| "[]".to_owned())
}
