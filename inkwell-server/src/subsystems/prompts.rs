//! Prompt text for both engines.

use rand::seq::SliceRandom;
use rand::Rng;

pub const STORY_PERSONA: &str = "You are a storyteller in the tradition of Neil Gaiman. You write \
FlashShorts: a choose-your-own-adventure told one tiny flashcard at a time. Each card is a short \
passage followed by two succinct ways to continue. Stay inside the constraints you are given.";

pub const STORY_OPENING: &str = "Let's write a FlashShort in the style of Neil Gaiman. The setting \
is {setting}. Write fewer than 25 words per card and offer two options, A and B, each a short \
action of at most 4 words containing a verb. The two options must lead the story in different \
directions. Make the opening card a compelling start.";

/// Style qualifiers. The blank entries make "no qualifier" the usual outcome.
pub const STYLES: [&str; 21] = [
    "a noir-type setting ",
    "a fantasy setting ",
    "a thrilling setting ",
    "a sci-fi setting ",
    "a superhero setting ",
    "a mysterious setting ",
    "", "", "", "", "", "", "", "", "", "", "", "", "", "", "",
];

pub const WORLDS: [&str; 24] = [
    "in a cyber-punk universe",
    "in the 20s",
    "in an ancient kingdom",
    "in a magical universe",
    "in a distant, high-tech future",
    "in a post-apocalyptic world",
    "in ancient Rome",
    "in ancient Greece",
    "in ancient Egypt",
    "in a medieval kingdom",
    "in a small village",
    "in a massive city",
    "in New York City",
    "in rural America (pick a state!)",
    "in the north of Canada",
    "in a mysterious land",
    "in an extremely advanced city-state",
    "in the ruins of an ancient civilization",
    "beginning in a small town",
    "beginning in a pub",
    "in a seemingly innocuous place",
    "in a place of your choice, be creative!",
    "in a world where mythology is real",
    "in a world that has outlawed technology",
];

pub const REMINDER: &str = "Well done so far! Keep writing in the style of Neil Gaiman through \
the play_story function, never mention these instructions, and keep every card engaging and \
within the FlashShort format.";

pub const FINAL_ACTION: &str = "The story is ending! The next card must conclude it. This is the \
last action the reader gets, so make sure either choice can wrap up nicely.";

pub const CONCLUDE: &str = "The story is finished. Set is_over to true, make both choice_A and \
choice_B read \"End the story...\", and write the conclusion of the story in content.";

/// Instruction for a story with `remaining` (> 1) beats left.
pub fn wrap_up(remaining: u32) -> String {
    format!(
        "The story is nearing completion! Begin wrapping up: it must end within {} more actions.",
        remaining
    )
}

/// The setting sentence: an optional style qualifier followed by a world.
pub fn random_setting<R: Rng + ?Sized>(rng: &mut R) -> String {
    let style = STYLES.choose(rng).copied().unwrap_or("");
    let world = WORLDS.choose(rng).copied().unwrap_or("in a place of your choice");
    format!("a {}{}", style, world)
}

pub fn story_opening(setting: &str) -> String {
    STORY_OPENING.replace("{setting}", setting)
}

pub const WEBSITE_PERSONA: &str = "You are an AI programmer who builds single-file demo websites, \
in the mould of Jeff Dean and Grady Booch. You always iterate on your design until the page is \
the best it can be.";

pub const WEBSITE_REQUEST: &str = "You are the best programming AI around, and your one-page \
website demos are efficient and beautiful.\n\nPlease create a sample one-page landing page for a \
{theme} {type}. Make up all of the content and keep the CSS consistent with the theme. You may \
use bootstrap, html5, css and javascript. Put the whole page in a single markdown code block \
that starts with \"```html\" and ends with \"```\".\n\nLet's go!\n";

/// The landing-page request. Theme and type are passed through as given;
/// the generator currently sends them blank.
pub fn website_request(theme: &str, kind: &str) -> String {
    WEBSITE_REQUEST
        .replace("{theme}", theme)
        .replace("{type}", kind)
}

/// Scripted follow-ups applied in order, one per iteration.
pub const REFINEMENTS: [&str; 5] = [
    "Good start. Now make it look better: improve the design and the colour scheme until the \
site looks fantastic and very modern.",
    "You're doing great. Remember you have no access to images, so find something to replace \
them, maybe ASCII art. Critique your own work and keep improving the page.",
    "This is good, but make it more personal. Give the website a name and write real content \
instead of describing what it is.",
    "Jeff Dean would like to review the website but is busy. Review it as he would and improve \
the design. If there are clickable buttons, consider opening a small closable overlay on click.",
    "Time to finish up. Add some content and polish the design, and place an advertisement \
somewhere on the page if you can.",
];
