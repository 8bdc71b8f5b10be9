use crate::llm::media::ImageData;

const STRICT_IDENTITY_CLAUSE: &str = " Strictly preserve the person's identity from the first \
     image: keep the face shape, facial features, skin tone, hairstyle and apparent age exactly \
     the same, so the result is unmistakably the same person.";

const NATURAL_CLAUSE: &str =
    " Keep the result natural and realistic, and keep the person recognizable.";

const INTERACTION_CLAUSE: &str = " Make the person physically interact with the objects in the \
     background in a natural way, with believable contact points, shadows and scale.";

const INTERACTION_WORDS: &[&str] = &[
    "sit", "sits", "sitting", "seated", "sat", "lie", "lies", "lying", "lay", "laying", "lean",
    "leans", "leaning", "leaned", "recline", "reclines", "reclining", "lounge", "lounging",
];

const INTERACTION_CJK: &[&str] = &["坐", "躺", "靠", "倚", "臥", "卧"];

/// Background or clothing guidance. A slot holds either a description or a
/// reference image, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuxiliaryAsset {
    #[default]
    Empty,
    Text(String),
    Image(ImageData),
}

impl AuxiliaryAsset {
    /// Blank descriptions collapse to `Empty`.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            AuxiliaryAsset::Empty
        } else {
            AuxiliaryAsset::Text(trimmed.to_string())
        }
    }

    /// Text input is disabled while a reference image occupies the slot.
    pub fn text_editable(&self) -> bool {
        !matches!(self, AuxiliaryAsset::Image(_))
    }

    #[cfg(test)]
    pub fn text(&self) -> Option<&str> {
        match self {
            AuxiliaryAsset::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AuxiliaryAsset::Empty => "none".to_string(),
            AuxiliaryAsset::Text(text) => format!("text \"{text}\""),
            AuxiliaryAsset::Image(image) => {
                format!("image ({}, {} bytes)", image.media_type(), image.len())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub instruction: String,
    /// Auxiliary images in the order the instruction refers to them. The source
    /// photo is not included; it always travels as the first image.
    pub attachments: Vec<ImageData>,
}

fn image_ordinal(position: usize) -> String {
    match position {
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        4 => "fourth".to_string(),
        5 => "fifth".to_string(),
        n => format!("{n}th"),
    }
}

// Position of the next attachment, counting the source photo as the first image.
fn next_image_ordinal(attachments: &[ImageData]) -> String {
    image_ordinal(attachments.len() + 2)
}

fn implies_contact_pose(action: &str) -> bool {
    let lowered = action.to_lowercase();
    if INTERACTION_CJK.iter().any(|keyword| lowered.contains(keyword)) {
        return true;
    }
    lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .any(|word| INTERACTION_WORDS.contains(&word))
}

pub fn compose(
    expression: &str,
    action: &str,
    background: &AuxiliaryAsset,
    clothing: &AuxiliaryAsset,
    consistency_enhanced: bool,
) -> ComposedPrompt {
    let expression = expression.trim();
    let action = action.trim();
    let mut attachments = Vec::new();

    let mut instruction = format!(
        "Change the facial expression of the person in the first image to: {expression}."
    );

    if !action.is_empty() {
        instruction.push_str(&format!(
            " Change the person's pose and action to: {action}."
        ));
    }

    match background {
        AuxiliaryAsset::Image(image) => {
            instruction.push_str(&format!(
                " Replace the background with the scene shown in the {} image, matching its lighting and perspective.",
                next_image_ordinal(&attachments)
            ));
            attachments.push(image.clone());
            if !action.is_empty() && implies_contact_pose(action) {
                instruction.push_str(INTERACTION_CLAUSE);
            }
        }
        AuxiliaryAsset::Text(text) if !text.trim().is_empty() => {
            instruction.push_str(&format!(
                " Replace the background with: {}.",
                text.trim()
            ));
        }
        _ => {}
    }

    match clothing {
        AuxiliaryAsset::Image(image) => {
            instruction.push_str(&format!(
                " Dress the person in the outfit shown in the {} image.",
                next_image_ordinal(&attachments)
            ));
            attachments.push(image.clone());
        }
        AuxiliaryAsset::Text(text) if !text.trim().is_empty() => {
            instruction.push_str(&format!(
                " Change the person's clothing to: {}.",
                text.trim()
            ));
        }
        _ => {}
    }

    instruction.push_str(if consistency_enhanced {
        STRICT_IDENTITY_CLAUSE
    } else {
        NATURAL_CLAUSE
    });

    ComposedPrompt {
        instruction,
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::media::fixtures;

    #[test]
    fn base_instruction_names_the_expression() {
        let composed = compose(
            " big smile ",
            "",
            &AuxiliaryAsset::Empty,
            &AuxiliaryAsset::Empty,
            false,
        );
        assert!(composed
            .instruction
            .starts_with("Change the facial expression of the person in the first image to: big smile."));
        assert!(composed.instruction.ends_with(NATURAL_CLAUSE));
        assert!(!composed.instruction.contains("background"));
        assert!(composed.attachments.is_empty());
    }

    #[test]
    fn background_and_clothing_images_are_referenced_by_position() {
        let background = fixtures::png(1);
        let clothing = fixtures::jpeg(2);
        let composed = compose(
            "crying",
            "",
            &AuxiliaryAsset::Image(background.clone()),
            &AuxiliaryAsset::Image(clothing.clone()),
            true,
        );

        assert!(composed.instruction.contains("the scene shown in the second image"));
        assert!(composed.instruction.contains("outfit shown in the third image"));
        assert!(composed.instruction.contains(STRICT_IDENTITY_CLAUSE));
        assert!(!composed.instruction.contains(NATURAL_CLAUSE));
        assert_eq!(composed.attachments, vec![background, clothing]);
    }

    #[test]
    fn clothing_image_alone_is_the_second_image() {
        let clothing = fixtures::png(7);
        let composed = compose(
            "angry",
            "",
            &AuxiliaryAsset::from_text("on a beach"),
            &AuxiliaryAsset::Image(clothing.clone()),
            false,
        );
        assert!(composed.instruction.contains("Replace the background with: on a beach."));
        assert!(composed.instruction.contains("outfit shown in the second image"));
        assert!(!composed.instruction.contains("third image"));
        assert_eq!(composed.attachments, vec![clothing]);
    }

    #[test]
    fn text_guidance_adds_no_attachments() {
        let composed = compose(
            "surprised",
            "jumping",
            &AuxiliaryAsset::from_text("sci-fi city"),
            &AuxiliaryAsset::from_text("a space suit"),
            false,
        );
        assert!(composed
            .instruction
            .contains("Change the person's pose and action to: jumping."));
        assert!(composed.instruction.contains("Replace the background with: sci-fi city."));
        assert!(composed
            .instruction
            .contains("Change the person's clothing to: a space suit."));
        assert!(composed.attachments.is_empty());
    }

    #[test]
    fn contact_pose_requests_interaction_only_with_background_image() {
        let background = AuxiliaryAsset::Image(fixtures::png(4));
        let with_image = compose("relaxed", "sitting on the sofa", &background, &AuxiliaryAsset::Empty, false);
        assert!(with_image.instruction.contains(INTERACTION_CLAUSE));

        let chinese = compose("relaxed", "坐在沙發上", &background, &AuxiliaryAsset::Empty, false);
        assert!(chinese.instruction.contains(INTERACTION_CLAUSE));

        let text_background = compose(
            "relaxed",
            "sitting on the sofa",
            &AuxiliaryAsset::from_text("living room"),
            &AuxiliaryAsset::Empty,
            false,
        );
        assert!(!text_background.instruction.contains(INTERACTION_CLAUSE));

        let no_contact = compose("happy", "waving earlier", &background, &AuxiliaryAsset::Empty, false);
        assert!(!no_contact.instruction.contains(INTERACTION_CLAUSE));
    }

    #[test]
    fn compose_is_deterministic_and_leaves_inputs_alone() {
        let background = AuxiliaryAsset::Image(fixtures::png(5));
        let clothing = AuxiliaryAsset::from_text("tuxedo");
        let before = (background.clone(), clothing.clone());

        let first = compose("wink", "leaning on a wall", &background, &clothing, true);
        let second = compose("wink", "leaning on a wall", &background, &clothing, true);
        assert_eq!(first, second);
        assert_eq!((background, clothing), before);
    }

    #[test]
    fn image_slot_disables_text_editing() {
        assert!(AuxiliaryAsset::Empty.text_editable());
        assert!(AuxiliaryAsset::from_text("beach").text_editable());
        assert!(!AuxiliaryAsset::Image(fixtures::png(1)).text_editable());
        assert_eq!(AuxiliaryAsset::from_text("   "), AuxiliaryAsset::Empty);
    }

    #[test]
    fn ordinals_extend_past_the_named_ones() {
        assert_eq!(image_ordinal(2), "second");
        assert_eq!(image_ordinal(7), "7th");
    }
}
