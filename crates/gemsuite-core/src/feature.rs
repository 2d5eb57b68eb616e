/// The three feature tabs, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feature {
    #[default]
    Chat,
    Vision,
    Story,
}

impl Feature {
    pub fn all() -> Vec<Feature> {
        vec![Feature::Chat, Feature::Vision, Feature::Story]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Feature::Chat => "Chat Assistant",
            Feature::Vision => "Image Analysis",
            Feature::Story => "Storyteller",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Feature::Chat => 0,
            Feature::Vision => 1,
            Feature::Story => 2,
        }
    }

    pub fn next(&self) -> Self {
        match self {
            Feature::Chat => Feature::Vision,
            Feature::Vision => Feature::Story,
            Feature::Story => Feature::Chat,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Feature::Chat => Feature::Story,
            Feature::Vision => Feature::Chat,
            Feature::Story => Feature::Vision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tabs_cycle_in_display_order() {
        let mut tab = Feature::default();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(tab);
            tab = tab.next();
        }
        assert_eq!(seen, Feature::all());
        assert_eq!(tab, Feature::Chat);
        assert_eq!(Feature::Chat.previous(), Feature::Story);
    }
}
