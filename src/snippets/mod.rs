//! Built-in default snippets.

use crate::artifact::ArtifactExpectation;
use crate::execution::ExecutionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snippet {
    pub name: &'static str,
    pub description: &'static str,
    pub expectation: ArtifactExpectation,
    pub source: &'static str,
}

impl Snippet {
    pub fn request(&self) -> ExecutionRequest {
        ExecutionRequest::new(self.source).expect(self.expectation)
    }
}

pub const BUILTIN: &[Snippet] = &[
    Snippet {
        name: "hello",
        description: "Return a plain string",
        expectation: ArtifactExpectation::Text,
        source: "greeting = 'hello'\ngreeting\n",
    },
    Snippet {
        name: "random-array",
        description: "Block randomization of 2K subjects into treated/untreated",
        expectation: ArtifactExpectation::Text,
        source: r#"
import numpy as np

def assign_to_treatment(K):
    untreated = np.zeros(K)
    treated = np.ones(K)
    overall_population = np.concatenate((treated, untreated))
    assignment = np.random.permutation(overall_population)
    return assignment.tolist()

assign_to_treatment(6)
"#,
    },
    Snippet {
        name: "line-plot",
        description: "Simple matplotlib line plot",
        expectation: ArtifactExpectation::Image,
        source: r#"
import matplotlib.pyplot as plt
import io
import base64

plt.figure()
plt.plot([0, 1, 2, 3], [0, 1, 4, 9])
plt.title('matplotlib plot')

buf = io.BytesIO()
plt.savefig(buf, format='png')
buf.seek(0)
plot_data = base64.b64encode(buf.read()).decode('utf-8')
plot_data
"#,
    },
    Snippet {
        name: "regression",
        description: "Seaborn regression plot over synthetic data",
        expectation: ArtifactExpectation::Image,
        source: r#"
import numpy as np
import pandas as pd
import seaborn as sns
import matplotlib.pyplot as plt
from io import BytesIO
import base64

np.random.seed(0)
data_size = 100
x = np.random.rand(data_size) * 10
y = 2.5 * x + np.random.randn(data_size) * 5
data = pd.DataFrame({'x': x, 'y': y})

plt.figure(figsize=(10, 6))
sns.regplot(x='x', y='y', data=data)
plt.title("Seaborn Regression Plot")
plt.xlabel("X values")
plt.ylabel("Y values")

buffer = BytesIO()
plt.savefig(buffer, format='png')
buffer.seek(0)
base64.b64encode(buffer.read()).decode('utf-8')
"#,
    },
    Snippet {
        name: "block-plot",
        description: "Randomized blocks drawn as rectangles, colored by group",
        expectation: ArtifactExpectation::Image,
        source: r#"
import matplotlib.pyplot as plt
import seaborn as sns
import numpy as np
import pandas as pd
from io import BytesIO
import base64

num_blocks = 10
num_groups = 5

np.random.seed(42)
blocks = pd.DataFrame({
    'x': np.random.rand(num_blocks) * 10,
    'y': np.random.rand(num_blocks) * 10,
    'width': np.random.rand(num_blocks) * 0.8 + 0.2,
    'height': np.random.rand(num_blocks) * 0.8 + 0.2,
    'group': [f'Group {i // 2 + 1}' for i in range(num_blocks)],
})

palette = sns.color_palette("tab20", num_groups)

fig, ax = plt.subplots(figsize=(8, 8))
for i, row in blocks.iterrows():
    ax.add_patch(plt.Rectangle(
        (row['x'], row['y']),
        row['width'],
        row['height'],
        color=palette[i // 2],
        label=row['group'] if i % 2 == 0 else "",
    ))

plt.xlim(0, 10)
plt.ylim(0, 10)
plt.xlabel('X Position')
plt.ylabel('Y Position')
plt.title('Block Randomization by Group')
handles, labels = ax.get_legend_handles_labels()
legend = dict(zip(labels, handles))
plt.legend(legend.values(), legend.keys(), loc="upper left", bbox_to_anchor=(1, 1))

buffer = BytesIO()
plt.savefig(buffer, format='png', bbox_inches='tight')
buffer.seek(0)
base64.b64encode(buffer.read()).decode('utf-8')
"#,
    },
];

pub fn find(name: &str) -> Option<&'static Snippet> {
    BUILTIN.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}
