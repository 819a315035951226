use crate::validation::models::{RunInput, Stage};

/// Role framing shared by every stage.
pub fn system_prompt(input: &RunInput) -> String {
    format!(
        "You are a market validation analyst working on a {} {} business idea. \
         Be concrete and skeptical. Ground every claim in the research you are given, \
         mark inferences as such, and never invent customer numbers. \
         Answer in markdown.",
        input.geo_market.as_str(),
        input.business_type.as_str(),
    )
}

/// What one stage must produce. The upstream context follows these instructions.
pub fn stage_instructions(stage: Stage) -> &'static str {
    match stage {
        Stage::DiscoverCompetitors => {
            "List the direct and indirect competitors for this idea. Reply with a single \
             ```json block shaped as {\"items\": [{\"name\", \"url\", \"segment\", \"pricing\", \"notes\"}], \
             \"candidates\": [\"name\", ...]}. Put at most 8 well-researched competitors in items \
             and any further names in candidates."
        }
        Stage::CompactCompetitors => {
            "Condense the competitor list into a table with one row per competitor: name, \
             target segment, core promise, price point. Follow it with three bullets on what the \
             field has in common."
        }
        Stage::AnalyzeChannels => {
            "For the competitors above, describe how each acquires customers: channels, \
             messaging on those channels, and any partnership or community plays. End with \
             the channels that look saturated and the ones that look underused."
        }
        Stage::ExtractValueProps => {
            "Extract each competitor's value proposition as one sentence, then group them \
             into recurring promises. Note which customer pains none of them address."
        }
        Stage::SummarizeResearch => {
            "Summarize the channel and value proposition research into a brief a strategist \
             can act on: market shape, dominant promises, channel patterns, open questions. \
             Keep headings and bullets; drop repetition."
        }
        Stage::MineGaps => {
            "Identify the market gaps this idea could own. For each gap give the evidence \
             from the research, who feels it most, and how defensible it is. Rank the gaps \
             and state which one the idea should target."
        }
        Stage::CreatePositioning => {
            "Write the positioning for the idea around the top-ranked gap: target customer, \
             point of view, core promise, proof points, and a landing page headline with \
             subheadline."
        }
        Stage::RedTeamReview => {
            "Act as a hostile reviewer of the positioning. Attack differentiation, evidence \
             and willingness to pay. List the fatal and fixable issues separately. The last \
             line must be exactly one of: VERDICT: LANDING_GO, VERDICT: LANDING_HOLD, \
             VERDICT: LANDING_NO."
        }
        Stage::RevisePositioning => {
            "Revise the positioning so that it answers every issue the red-team review \
             raised. Keep what survived the review, replace what did not, and say what \
             changed and why in a short changelog."
        }
        Stage::RedTeamRecheck => {
            "Re-review the revised positioning with the same standard as the first review. \
             State which earlier issues are resolved and which remain. The last line must \
             be exactly one of: VERDICT: LANDING_GO, VERDICT: LANDING_HOLD, VERDICT: LANDING_NO."
        }
        Stage::FinalReport => {
            "Write the final validation report: executive summary, the chosen gap, the \
             positioning, key risks from the review, and concrete next steps for a landing \
             page test. Use headings and bullets."
        }
    }
}
