mod composer;
mod heuristics;

pub use composer::{
    compose, compose_edit, edit_variants, generation_variants, ComposedPrompt, VariantDescriptor,
    EDIT_TWISTS, GENERATION_TWISTS, SINGLE_EDIT_TWIST,
};
pub use heuristics::{
    camera_spec, edit_variant_count, EditMode, Framing, KeywordSet, CLOSE_UP_KEYWORDS,
    PLURAL_EDIT_KEYWORDS, STRUCTURAL_EDIT_KEYWORDS,
};
