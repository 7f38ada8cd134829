use crate::request::{AspectRatio, CameraMode, EncodedImage, GenerationRequestSpec};

use super::heuristics::{camera_spec, EditMode, Framing};

pub const GENERATION_TWISTS: &[&str] = &[
    "Create a candid moment, imperfect shutter timing.",
    "Use harsh lighting to emphasize raw texture.",
    "Apply an off-center, documentary-style composition.",
    "Add slight motion blur on edges for a dynamic feel.",
];

pub const EDIT_TWISTS: &[&str] = &[
    "Generate the first variation.",
    "Generate a second, different variation.",
];

pub const SINGLE_EDIT_TWIST: &str = "Generate the result.";

const DEFAULT_CORE_IDEA: &str = "A candid, unposed photo of the person from the first input image.";

const NEGATIVE_PROMPT: &str = "**Negative Prompt (Do Not Include):**\n--style: beauty filter, smooth skin, studio lighting, perfect symmetry, model posing, overprocessed, airbrushed, plastic, doll, cgi, 3d render, illustration, cartoon, anime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDescriptor {
    pub index: usize,
    pub twist: &'static str,
}

/// Backend-ready request for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub text: String,
    pub reference_images: Vec<EncodedImage>,
    pub aspect_ratio: AspectRatio,
}

pub fn generation_variants(count: usize) -> Vec<VariantDescriptor> {
    cycle_catalog(GENERATION_TWISTS, count)
}

pub fn edit_variants(count: usize) -> Vec<VariantDescriptor> {
    if count == 1 {
        return vec![VariantDescriptor {
            index: 0,
            twist: SINGLE_EDIT_TWIST,
        }];
    }
    cycle_catalog(EDIT_TWISTS, count)
}

fn cycle_catalog(catalog: &'static [&'static str], count: usize) -> Vec<VariantDescriptor> {
    if catalog.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|index| VariantDescriptor {
            index,
            twist: catalog[index % catalog.len()],
        })
        .collect()
}

pub fn compose(spec: &GenerationRequestSpec, variant: &VariantDescriptor) -> ComposedPrompt {
    let framing = Framing::classify(&spec.prompt, spec.aspect_ratio);
    let camera = camera_spec(spec.camera_mode);
    let location = or_default(&spec.location_text, "a realistic environment");
    let outfit = or_default(&spec.outfit_text, "realistic daily wear");
    let body = or_default(&spec.body_details, "natural and realistic");
    let idea = or_default(&spec.prompt, DEFAULT_CORE_IDEA);

    let text = format!(
        "Generate a raw, unedited, candid photograph of the person from the first input image.\n\n\
The setting is \"{location}\", and the lighting must strictly match the second input image (if provided). \
The subject is wearing \"{outfit}\", with physical characteristics described as \"{body}\". \
The main creative idea for the photo is: \"{idea}\". \
For this specific version, the creative twist is: \"{twist}\".\n\n\
**Mandatory Technical & Realism Directives:**\n\
- **Camera & Framing:** The photo must look like it was taken with a {camera}, using this framing: {framing}.\n\
- **Identity Lock:** The person's face must be an exact match to the first input image. This is the highest priority.\n\
- **Raw Realism:** Render hyper-realistic, imperfect skin with visible texture, subtle pores, and natural, uneven skin tone. \
The hairline must be imperfect with stray hairs. Absolutely no digital smoothing or beautification.\n\n\
{NEGATIVE_PROMPT}\n",
        twist = variant.twist,
        framing = framing.instruction(),
    );

    let reference_images = [
        spec.subject_image.as_ref(),
        spec.location_image.as_ref(),
        spec.outfit_image.as_ref(),
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect();

    ComposedPrompt {
        text,
        reference_images,
        aspect_ratio: spec.aspect_ratio,
    }
}

pub fn compose_edit(
    reference: &EncodedImage,
    instruction: &str,
    identity_reference: Option<&EncodedImage>,
    context: Option<&GenerationRequestSpec>,
    variant: &VariantDescriptor,
) -> ComposedPrompt {
    let camera = camera_spec(
        context
            .map(|spec| spec.camera_mode)
            .unwrap_or(CameraMode::StudioMediumFormat),
    );
    let mode_rules = match EditMode::classify(instruction) {
        EditMode::Reimagine => format!(
            "**Edit Mode: Re-imagine**\n\
Re-create the scene and pose based on the user's instruction: \"{instruction}\". \
The new scene's lighting, camera style, and realism level must match the aesthetic of the first input image."
        ),
        EditMode::Retouch => format!(
            "**Edit Mode: Retouch**\n\
Apply this specific change: \"{instruction}\". \
Preserve all other details from the first input image, especially the background, lighting, and original skin texture."
        ),
    };

    let text = format!(
        "You are editing a photograph. The first input image is the base to edit. \
The second input image (if provided) is the definitive reference for the person's facial identity.\n\n\
{mode_rules}\n\n\
**Universal Rules (Mandatory):**\n\
- **Identity Lock:** The person's face MUST be an exact match to the second input image (the identity reference).\n\
- **Camera Consistency:** The final edit must look like it was taken with a {camera}.\n\
- **Raw Realism:** Maintain realistic, imperfect skin texture. Do not add any digital smoothing or beauty filters.\n\
- **Variation Note for this version:** {twist}.\n\n\
{NEGATIVE_PROMPT}\n",
        twist = variant.twist,
    );

    let mut reference_images = vec![reference.clone()];
    if let Some(identity) = identity_reference {
        reference_images.push(identity.clone());
    }

    ComposedPrompt {
        text,
        reference_images,
        aspect_ratio: context
            .map(|spec| spec.aspect_ratio)
            .unwrap_or(AspectRatio::Portrait3x4),
    }
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_all_images() -> GenerationRequestSpec {
        GenerationRequestSpec {
            subject_image: Some(EncodedImage::new("image/jpeg", "subject")),
            location_image: Some(EncodedImage::new("image/jpeg", "location")),
            outfit_image: Some(EncodedImage::new("image/jpeg", "outfit")),
            ..GenerationRequestSpec::default()
        }
    }

    #[test]
    fn generation_references_are_subject_location_outfit() {
        let prompt = compose(&spec_with_all_images(), &generation_variants(1)[0]);
        let order = prompt
            .reference_images
            .iter()
            .map(EncodedImage::data)
            .collect::<Vec<&str>>();
        assert_eq!(order, vec!["subject", "location", "outfit"]);
    }

    #[test]
    fn missing_optional_images_are_skipped() {
        let mut spec = spec_with_all_images();
        spec.location_image = None;
        let prompt = compose(&spec, &generation_variants(1)[0]);
        let order = prompt
            .reference_images
            .iter()
            .map(EncodedImage::data)
            .collect::<Vec<&str>>();
        assert_eq!(order, vec!["subject", "outfit"]);
    }

    #[test]
    fn blank_fields_fall_back_to_defaults() {
        let prompt = compose(&spec_with_all_images(), &generation_variants(1)[0]);
        assert!(prompt.text.contains("\"a realistic environment\""));
        assert!(prompt.text.contains("\"realistic daily wear\""));
        assert!(prompt.text.contains("\"natural and realistic\""));
        assert!(prompt.text.contains(DEFAULT_CORE_IDEA));
    }

    #[test]
    fn composed_prompt_embeds_framing_camera_twist_and_boilerplate() {
        let mut spec = spec_with_all_images();
        spec.prompt = "mirror selfie in an elevator".to_string();
        spec.aspect_ratio = AspectRatio::Portrait9x16;
        spec.camera_mode = CameraMode::PhoneAmateur;
        let variants = generation_variants(3);
        let prompt = compose(&spec, &variants[2]);

        assert!(prompt.text.contains(Framing::VerticalSelfie.instruction()));
        assert!(prompt.text.contains(camera_spec(CameraMode::PhoneAmateur)));
        assert!(prompt.text.contains(GENERATION_TWISTS[2]));
        assert!(prompt.text.contains("**Identity Lock:**"));
        assert!(prompt.text.contains(NEGATIVE_PROMPT));
        assert_eq!(prompt.aspect_ratio, AspectRatio::Portrait9x16);
    }

    #[test]
    fn variant_catalog_cycles_by_index() {
        let variants = generation_variants(6);
        assert_eq!(variants.len(), 6);
        assert_eq!(variants[4].twist, GENERATION_TWISTS[0]);
        assert_eq!(variants[5].index, 5);
        assert_eq!(edit_variants(1)[0].twist, SINGLE_EDIT_TWIST);
        assert_eq!(
            edit_variants(2)
                .iter()
                .map(|variant| variant.twist)
                .collect::<Vec<&str>>(),
            EDIT_TWISTS.to_vec()
        );
    }

    #[test]
    fn edit_references_put_base_before_identity() {
        let base = EncodedImage::png("base");
        let identity = EncodedImage::new("image/jpeg", "identity");
        let prompt = compose_edit(
            &base,
            "make the shirt red",
            Some(&identity),
            None,
            &edit_variants(1)[0],
        );
        assert_eq!(prompt.reference_images, vec![base, identity]);
        assert_eq!(prompt.aspect_ratio, AspectRatio::Portrait3x4);
        assert!(prompt.text.contains("**Edit Mode: Retouch**"));
        assert!(prompt.text.contains(camera_spec(CameraMode::StudioMediumFormat)));
        assert!(prompt.text.contains(NEGATIVE_PROMPT));
    }

    #[test]
    fn edit_uses_context_camera_and_ratio() {
        let mut context = spec_with_all_images();
        context.camera_mode = CameraMode::PhoneAmateur;
        context.aspect_ratio = AspectRatio::Portrait9x16;
        let prompt = compose_edit(
            &EncodedImage::png("base"),
            "change the background to a night market",
            None,
            Some(&context),
            &edit_variants(2)[1],
        );
        assert_eq!(prompt.reference_images.len(), 1);
        assert_eq!(prompt.aspect_ratio, AspectRatio::Portrait9x16);
        assert!(prompt.text.contains("**Edit Mode: Re-imagine**"));
        assert!(prompt.text.contains(camera_spec(CameraMode::PhoneAmateur)));
        assert!(prompt.text.contains(EDIT_TWISTS[1]));
    }
}
