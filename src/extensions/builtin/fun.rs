//! Novelty commands: dice, coins, the magic 8-ball and block digits.

use chrono::Local;
use chrono_tz::Tz;
use clap::Parser;
use rand::Rng;

use super::parse_opts;
use crate::extensions::{CommandContext, Exports, Extension};

pub const NAME: &str = "fun";

const MAX_DICE: i64 = 100;
const MAX_SIDES: i64 = 1000;
const MAX_COINS: i64 = 100;
const MAX_DIGITS: usize = 20;

const EIGHT_BALL: &[&str] = &[
    "It is certain.",
    "It is decidedly so.",
    "Without a doubt.",
    "Yes, definitely.",
    "You may rely on it.",
    "As I see it, yes.",
    "Most likely.",
    "Outlook good.",
    "Yes.",
    "Signs point to yes.",
    "Reply hazy, try again.",
    "Ask again later.",
    "Better not tell you now.",
    "Cannot predict now.",
    "Concentrate and ask again.",
    "Don't count on it.",
    "My reply is no.",
    "My sources say no.",
    "Outlook not so good.",
    "Very doubtful.",
];

pub struct Fun;

impl Extension for Fun {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Entertainment and novelty commands"
    }

    fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
        exports
            .command("dice", dice)
            .command("coin", coin)
            .command("8ball", eight_ball)
            .command("digits", digits)
            .command("digiclock", digiclock);
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct DiceOpts {
    #[arg(short, long, allow_hyphen_values = true)]
    count: Option<String>,
    #[arg(short, long, allow_hyphen_values = true)]
    sides: Option<String>,
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct CoinOpts {
    #[arg(short, long, allow_hyphen_values = true)]
    count: Option<String>,
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ClockOpts {
    #[arg(short, long)]
    timezone: Option<String>,
}

fn dice(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<DiceOpts>(ctx, args) else {
        return Ok(());
    };
    let count = match opts.count.as_deref().map(str::parse::<i64>) {
        None => 1,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            ctx.reply(format!("Invalid count: {}", opts.count.unwrap_or_default()));
            return Ok(());
        }
    };
    let sides = match opts.sides.as_deref().map(str::parse::<i64>) {
        None => 6,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            ctx.reply(format!("Invalid sides: {}", opts.sides.unwrap_or_default()));
            return Ok(());
        }
    };

    match roll_dice(count, sides) {
        Ok(results) => ctx.reply(format_dice_results(sides, &results)),
        Err(message) => ctx.reply(message),
    }
    Ok(())
}

/// Roll `count` dice with `sides` sides, or explain why that is not
/// possible.
pub fn roll_dice(count: i64, sides: i64) -> Result<Vec<i64>, &'static str> {
    if count <= 0 {
        return Err("You appear to be rolling thin air.");
    }
    if count > MAX_DICE {
        return Err("That's too many dice! Maximum is 100.");
    }
    if sides < 2 {
        return Err("A one sided die is not possible, however a two sided die is.");
    }
    if sides > MAX_SIDES {
        return Err("That's too many sides! Maximum is 1000.");
    }
    let mut rng = rand::rng();
    Ok((0..count).map(|_| rng.random_range(1..=sides)).collect())
}

pub fn format_dice_results(sides: i64, results: &[i64]) -> String {
    let total: i64 = results.iter().sum();
    match results {
        [] => String::new(),
        [only] => format!("You rolled a single die with {sides} sides and got a {only}."),
        [first, last] => format!(
            "You rolled 2 dice with {sides} sides and got a {first} and a {last}. Total: {total}"
        ),
        [rest @ .., last] => {
            let rest: Vec<String> = rest.iter().map(i64::to_string).collect();
            format!(
                "You rolled {} dice with {sides} sides and got {}, and a {last}. Total: {total}",
                results.len(),
                rest.join(", ")
            )
        }
    }
}

fn coin(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<CoinOpts>(ctx, args) else {
        return Ok(());
    };
    let count = match opts.count.as_deref().map(str::parse::<i64>) {
        None => 1,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            ctx.reply(format!("Invalid count: {}", opts.count.unwrap_or_default()));
            return Ok(());
        }
    };
    if count <= 0 {
        ctx.reply("You need to flip at least one coin!");
        return Ok(());
    }
    if count > MAX_COINS {
        ctx.reply("That's too many coins! Maximum is 100.");
        return Ok(());
    }

    let mut rng = rand::rng();
    let flips: Vec<&str> = (0..count)
        .map(|_| if rng.random_bool(0.5) { "Heads" } else { "Tails" })
        .collect();
    ctx.reply(format_coin_results(&flips));
    Ok(())
}

pub fn format_coin_results(flips: &[&str]) -> String {
    match flips {
        [] => String::new(),
        [only] => format!("You flipped: {only}"),
        [rest @ .., last] => {
            let heads = flips.iter().filter(|f| **f == "Heads").count();
            let tails = flips.len() - heads;
            format!(
                "You flipped {} coins: {}, and {last}. (Heads: {heads}, Tails: {tails})",
                flips.len(),
                rest.join(", ")
            )
        }
    }
}

fn eight_ball(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        ctx.reply("Ask me a question!");
        return Ok(());
    }
    let answer = EIGHT_BALL[rand::rng().random_range(0..EIGHT_BALL.len())];
    ctx.reply(answer);
    Ok(())
}

const DIGIT_ART: [(char, [&str; 5]); 11] = [
    ('0', ["██████", "██  ██", "██  ██", "██  ██", "██████"]),
    ('1', ["    ██", "    ██", "    ██", "    ██", "    ██"]),
    ('2', ["██████", "    ██", "██████", "██    ", "██████"]),
    ('3', ["██████", "    ██", "██████", "    ██", "██████"]),
    ('4', ["██  ██", "██  ██", "██████", "    ██", "    ██"]),
    ('5', ["██████", "██    ", "██████", "    ██", "██████"]),
    ('6', ["██████", "██    ", "██████", "██  ██", "██████"]),
    ('7', ["██████", "    ██", "    ██", "    ██", "    ██"]),
    ('8', ["██████", "██  ██", "██████", "██  ██", "██████"]),
    ('9', ["██████", "██  ██", "██████", "    ██", "██████"]),
    (':', ["      ", "  ██  ", "      ", "  ██  ", "      "]),
];

/// Render the supported characters of `text` as five rows of block art.
/// Unsupported characters are skipped.
pub fn render_block_digits(text: &str) -> Vec<String> {
    let glyphs: Vec<&[&str; 5]> = text
        .chars()
        .filter_map(|c| DIGIT_ART.iter().find(|(g, _)| *g == c).map(|(_, art)| art))
        .collect();
    if glyphs.is_empty() {
        return Vec::new();
    }
    (0..5)
        .map(|row| {
            glyphs
                .iter()
                .map(|art| art[row])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn digits(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        ctx.reply("Usage: digits NUMBER [NUMBER...]");
        return Ok(());
    }
    let digits: String = args.concat().chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        ctx.reply("No valid digits provided");
        return Ok(());
    }
    if digits.len() > MAX_DIGITS {
        ctx.reply("Too many digits! Maximum is 20.");
        return Ok(());
    }
    for line in render_block_digits(&digits) {
        ctx.reply(line);
    }
    Ok(())
}

fn digiclock(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<ClockOpts>(ctx, args) else {
        return Ok(());
    };
    let time = match opts.timezone {
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => Local::now().with_timezone(&tz).format("%H:%M:%S").to_string(),
            Err(_) => {
                ctx.reply(format!("Invalid timezone: {name}"));
                return Ok(());
            }
        },
        None => Local::now().format("%H:%M:%S").to_string(),
    };
    for line in render_block_digits(&time) {
        ctx.reply(line);
    }
    Ok(())
}
